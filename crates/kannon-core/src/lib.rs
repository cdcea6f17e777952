//! # kannon-core
//!
//! Dispatch pipeline for outbound campaign email.
//!
//! This crate provides:
//! - Domain models for campaigns, backlog entries, domains and templates
//! - A repository trait with a `SQLite` implementation and atomic claim
//! - **Sending Pool Manager** - claims batches of scheduled entries
//! - **Mail Builder** - turns an entry into an [`EmailToSend`] queue payload
//! - **Delivery Engine** - renders, DKIM-signs and relays one message
//! - **Dispatcher Loop** - publishes payloads on `emails.sending`
//! - **Outcome Consumers** - drain `email-error` and `email-delivered`
//! - **Sending Worker** - consumes `emails.sending` and reports outcomes
//! - A NATS `JetStream` binding and layered configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod dispatcher;
mod error;
pub mod mailbuilder;
pub mod mailer;
pub mod model;
pub mod outcome;
pub mod pb;
pub mod pool;
pub mod store;
pub mod worker;

pub use broker::{Acknowledge, Consumer, NatsBroker, Publisher};
pub use config::{Config, SmtpConfig, SmtpSecurity};
pub use dispatcher::{CycleReport, DispatchFailurePolicy, Dispatcher};
pub use error::{BrokerError, Error, ErrorKind, Result, TransportError};
pub use mailbuilder::MailBuilder;
pub use mailer::{Attempt, AttemptStage, Sender, SmtpMailer, SmtpSender};
pub use model::{
    Domain, SenderIdentity, SendingPool, SendingPoolEmail, SendingStatus, Template, TerminalStatus,
};
pub use outcome::{LogOutcome, Outcome, OutcomeConsumer, OutcomeHandler, OutcomeKind};
pub use pb::{EmailDelivered, EmailError, EmailToSend};
pub use pool::SendingPoolManager;
pub use store::{SqliteStore, Store};
pub use worker::SendingWorker;
