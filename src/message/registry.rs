//! Message registry for resolving command codes.
//!
//! The registry maps each command code to a [`MessageDefinition`]: a name, the
//! response code that answers a request with this code, and a factory building
//! an empty message to decode an inbound frame into. It is pure lookup; what
//! to do with unknown codes is decided by the session.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::history::HistoryKind;
use crate::message::{BolusStart, Message, MessageBody};
use crate::protocol::CommandCode;
use crate::types::BolusSpeed;

/// Factory producing an empty body for decoding.
pub type BodyFactory = Box<dyn Fn() -> MessageBody + Send + Sync>;

/// Definition of one message kind.
pub struct MessageDefinition {
    name: &'static str,
    command: CommandCode,
    response: CommandCode,
    factory: BodyFactory,
}

impl MessageDefinition {
    /// Creates a definition.
    pub fn new<F>(name: &'static str, command: CommandCode, response: CommandCode, factory: F) -> Self
    where
        F: Fn() -> MessageBody + Send + Sync + 'static,
    {
        Self {
            name,
            command,
            response,
            factory: Box::new(factory),
        }
    }

    /// Creates a definition for an opaque message answered on `response`.
    #[must_use]
    pub fn raw(name: &'static str, command: CommandCode, response: CommandCode) -> Self {
        Self::new(name, command, response, move || {
            Message::raw(command, response, bytes::Bytes::new()).into_body()
        })
    }

    /// Creates a definition whose response code is the body's own.
    fn typed<F>(name: &'static str, factory: F) -> Self
    where
        F: Fn() -> MessageBody + Send + Sync + 'static,
    {
        let body = factory();
        Self::new(name, body.command(), body.response_command(), factory)
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Command code the definition is bound to.
    #[must_use]
    pub const fn command(&self) -> CommandCode {
        self.command
    }

    /// Command code answering a request with this definition's code.
    #[must_use]
    pub const fn response(&self) -> CommandCode {
        self.response
    }

    /// Builds an empty message ready to decode an inbound frame.
    #[must_use]
    pub fn create(&self) -> Message {
        Message::new((self.factory)())
    }
}

impl fmt::Debug for MessageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDefinition")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// Registry mapping command codes to message definitions.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    definitions: HashMap<CommandCode, MessageDefinition>,
}

impl MessageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in message kind.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtin = [
            MessageDefinition::typed("keep connection", || MessageBody::KeepConnection),
            MessageDefinition::typed("status", || MessageBody::Status(None)),
            MessageDefinition::typed("pump time", || MessageBody::PumpTime(None)),
            MessageDefinition::typed("bolus start", || {
                MessageBody::BolusStart(BolusStart {
                    amount_centi: 0,
                    speed: BolusSpeed::Normal,
                    status: None,
                })
            }),
            MessageDefinition::typed("bolus stop", || MessageBody::BolusStop(None)),
            MessageDefinition::typed("alarm notice", || MessageBody::AlarmNotice(None)),
            MessageDefinition::typed("history record", || MessageBody::HistoryFrame(None)),
        ];
        let history = HistoryKind::ALL_KINDS.into_iter().map(|kind| {
            MessageDefinition::typed(kind.name(), move || Message::history(kind).into_body())
        });
        for definition in builtin.into_iter().chain(history) {
            registry.definitions.insert(definition.command, definition);
        }
        registry
    }

    /// Binds a definition to its command code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRegistration`] if the code is already bound.
    pub fn register(&mut self, definition: MessageDefinition) -> Result<()> {
        let command = definition.command;
        if self.definitions.contains_key(&command) {
            return Err(Error::DuplicateRegistration(command));
        }
        tracing::debug!(%command, name = definition.name, "registered message");
        self.definitions.insert(command, definition);
        Ok(())
    }

    /// Resolves a command code to its definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCommand`] if nothing is registered for the code.
    pub fn resolve(&self, command: CommandCode) -> Result<&MessageDefinition> {
        self.definitions
            .get(&command)
            .ok_or(Error::UnknownCommand(command))
    }

    /// Response code designated for a request code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCommand`] if nothing is registered for the code.
    pub fn expected_response(&self, command: CommandCode) -> Result<CommandCode> {
        self.resolve(command).map(MessageDefinition::response)
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
