use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::PathBuf;

use enum_dispatch::enum_dispatch;
use getset::{CopyGetters, Getters};
use lettre::address::AddressError;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::{self, SmtpTransport};
use lettre::{Message, Transport};
use log::{debug, info, warn};
use thiserror::Error;

use crate::render::format;
use crate::render::RenderedReport;
use crate::settings::{EmailSettings, Settings};

/// Implicit TLS port; everything else upgrades with STARTTLS.
const SMTPS_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid email address `{address}`: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressError,
    },
    #[error("no recipients configured")]
    NoRecipients,
    #[error("email username or password not configured")]
    MissingCredentials,
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("invalid attachment content type: {0}")]
    ContentType(#[from] ContentTypeErr),
    #[error("smtp error: {0}")]
    Smtp(#[from] smtp::Error),
    #[error("smtp server {host} did not accept the connection")]
    Unreachable { host: String },
    #[error("failed to save report: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    SavedLocally,
    Failed,
}

/// What happened to a report.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DeliveryResult {
    #[getset(get_copy = "pub")]
    status: DeliveryStatus,
    #[getset(get = "pub")]
    recipients: Vec<String>,
    #[getset(get = "pub")]
    path: Option<PathBuf>,
    #[getset(get = "pub")]
    error: Option<String>,
}

impl DeliveryResult {
    pub fn sent(recipients: Vec<String>) -> DeliveryResult {
        DeliveryResult {
            status: DeliveryStatus::Sent,
            recipients,
            path: None,
            error: None,
        }
    }

    pub fn saved(path: PathBuf) -> DeliveryResult {
        DeliveryResult {
            status: DeliveryStatus::SavedLocally,
            recipients: Vec::new(),
            path: Some(path),
            error: None,
        }
    }

    pub fn failed(err: &DeliveryError) -> DeliveryResult {
        DeliveryResult {
            status: DeliveryStatus::Failed,
            recipients: Vec::new(),
            path: None,
            error: Some(err.to_string()),
        }
    }
}

#[enum_dispatch]
pub trait Dispatch {
    fn dispatch(&self, report: &RenderedReport) -> Result<DeliveryResult, DeliveryError>;
}

#[enum_dispatch(Dispatch)]
#[derive(Debug)]
pub enum Dispatcher {
    EmailDispatcher,
    LocalDispatcher,
}

impl Dispatcher {
    /// Email when enabled in `settings`, otherwise a local file. `dry_run`
    /// always writes locally.
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Result<Dispatcher, DeliveryError> {
        if dry_run || !settings.email.enabled {
            return Ok(LocalDispatcher::new(settings.output.dir.clone()).into());
        }

        let mailer = SmtpMailer::new(&settings.email)?;
        let dispatcher = EmailDispatcher::new(
            Box::new(mailer),
            settings.email.sender(),
            &settings.email.recipients,
            &settings.store.name,
        )?;

        Ok(dispatcher.into())
    }
}

/// Something that can deliver a finished message.
pub trait Mailer: Debug {
    fn send(&self, message: &Message) -> Result<(), DeliveryError>;

    /// Connects and authenticates without sending anything.
    fn check_connection(&self) -> Result<(), DeliveryError>;
}

#[derive(Debug)]
pub struct SmtpMailer {
    host: String,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings) -> Result<SmtpMailer, DeliveryError> {
        if settings.username.trim().is_empty() || settings.password.is_empty() {
            return Err(DeliveryError::MissingCredentials);
        }

        let builder = if settings.port == SMTPS_PORT {
            SmtpTransport::relay(&settings.host)?
        } else {
            SmtpTransport::starttls_relay(&settings.host)?
        };

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(settings.username.trim().to_owned(), settings.password.clone()))
            .timeout(Some(settings.timeout()))
            .build();

        Ok(SmtpMailer {
            host: settings.host.clone(),
            transport,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let response = self.transport.send(message)?;
        debug!("smtp response, code={}", response.code());
        Ok(())
    }

    fn check_connection(&self) -> Result<(), DeliveryError> {
        if self.transport.test_connection()? {
            info!("smtp connection ok, host={}", self.host);
            Ok(())
        } else {
            Err(DeliveryError::Unreachable { host: self.host.clone() })
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.trim().parse().map_err(|source| DeliveryError::InvalidAddress {
        address: address.to_owned(),
        source,
    })
}

/// Sends the report as a PDF attachment.
#[derive(Debug)]
pub struct EmailDispatcher {
    mailer: Box<dyn Mailer>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    store_name: String,
}

impl EmailDispatcher {
    pub fn new(
        mailer: Box<dyn Mailer>,
        from: &str,
        recipients: &[String],
        store_name: &str,
    ) -> Result<EmailDispatcher, DeliveryError> {
        let recipients = recipients
            .iter()
            .filter(|address| !address.trim().is_empty())
            .map(|address| parse_mailbox(address))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        Ok(EmailDispatcher {
            mailer,
            from: parse_mailbox(from)?,
            recipients,
            store_name: store_name.to_owned(),
        })
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub fn subject(&self, report: &RenderedReport) -> String {
        format!("{} - {} - {}", self.store_name, report.title(), report.window().label())
    }

    fn body(&self, report: &RenderedReport) -> String {
        format!(
            "Hello,\n\n\
             Please find attached the {} for {}, period {}.\n\n\
             Generated {} (template v{}).\n",
            report.title().to_lowercase(),
            self.store_name,
            report.window().label(),
            report.generated_at().format("%Y-%m-%d %H:%M UTC"),
            report.template_version(),
        )
    }

    pub fn build_message(&self, report: &RenderedReport) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(self.subject(report));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        let attachment = Attachment::new(report.file_name().clone())
            .body(report.bytes().clone(), ContentType::parse("application/pdf")?);

        let message = builder.multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(self.body(report)))
                .singlepart(attachment),
        )?;

        Ok(message)
    }
}

impl Dispatch for EmailDispatcher {
    fn dispatch(&self, report: &RenderedReport) -> Result<DeliveryResult, DeliveryError> {
        let message = self.build_message(report)?;
        self.mailer.send(&message)?;

        let recipients: Vec<String> = self.recipients.iter().map(ToString::to_string).collect();
        info!(
            "report emailed, file={} recipients={} size={}",
            report.file_name(),
            recipients.join(", "),
            format::count(report.bytes().len())
        );

        Ok(DeliveryResult::sent(recipients))
    }
}

/// Writes the report into a directory.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    dir: PathBuf,
}

impl LocalDispatcher {
    pub fn new(dir: impl Into<PathBuf>) -> LocalDispatcher {
        LocalDispatcher { dir: dir.into() }
    }
}

impl Dispatch for LocalDispatcher {
    fn dispatch(&self, report: &RenderedReport) -> Result<DeliveryResult, DeliveryError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(report.file_name());
        if path.exists() {
            warn!("overwriting existing report, path={}", path.display());
        }

        // Written beside the target and renamed over it, so the final path
        // only ever holds a complete document.
        let partial = self.dir.join(format!(".{}.partial", report.file_name()));
        if let Err(err) = fs::write(&partial, report.bytes()).and_then(|()| fs::rename(&partial, &path)) {
            let _ = fs::remove_file(&partial);
            return Err(err.into());
        }

        info!("report saved, path={}", path.display());
        Ok(DeliveryResult::saved(path))
    }
}
