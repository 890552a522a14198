//! Command sequences
//!
//! A [`CommandSequence`] tracks one outbound request through the
//! request → ACK → response → callback exchange its [`CommandFlow`] defines.
//! Entering `Complete` or `Failed` resolves the completion signal the sender
//! is waiting on.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

use crate::api::{Command, CommandFlow};
use crate::protocol::{DataFrame, SequenceError};

/// Default number of transmission attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Progress of a command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceState {
    /// Request is queued but has not been sent yet
    Pending,
    /// Waiting for the module to send an ACK frame
    WaitingForAck,
    /// Waiting for the module to send a response frame
    WaitingForResponse,
    /// Waiting for the module to send a callback
    WaitingForCallback,
    /// Every expected frame has arrived
    Complete,
    /// The sequence has failed to complete
    Failed,
}

impl SequenceState {
    /// Whether no further progress is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequenceState::Complete | SequenceState::Failed)
    }
}

/// Operation attempted on a sequence, reported by illegal transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceOperation {
    Start,
    AcknowledgeRequest,
    UpdateResponse,
    UpdateCallback,
}

impl fmt::Display for SequenceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceOperation::Start => "start the sequence",
            SequenceOperation::AcknowledgeRequest => "acknowledge the request",
            SequenceOperation::UpdateResponse => "update the response",
            SequenceOperation::UpdateCallback => "update the callback",
        };
        f.write_str(name)
    }
}

/// State machine for one in-flight request
#[derive(Debug)]
pub struct CommandSequence {
    request: DataFrame,
    flow: CommandFlow,
    state: SequenceState,
    attempt: u32,
    max_retries: u32,
    response: Option<Command>,
    callback: Option<Command>,
    completion: Option<oneshot::Sender<SequenceState>>,
}

impl CommandSequence {
    /// Create a pending sequence for an encoded request
    pub fn new(request: DataFrame, flow: CommandFlow) -> Self {
        Self {
            request,
            flow,
            state: SequenceState::Pending,
            attempt: 1,
            max_retries: DEFAULT_MAX_RETRIES,
            response: None,
            callback: None,
            completion: None,
        }
    }

    /// Set the maximum number of transmission attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The encoded request, retransmitted unchanged on every attempt
    pub fn request(&self) -> &DataFrame {
        &self.request
    }

    pub fn command_id(&self) -> u8 {
        self.request.command_id
    }

    pub fn flow(&self) -> CommandFlow {
        self.flow
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// The transmission attempt counter, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn response(&self) -> Option<&Command> {
        self.response.as_ref()
    }

    pub fn callback(&self) -> Option<&Command> {
        self.callback.as_ref()
    }

    /// Whether another attempt is allowed by the retry policy
    pub fn can_transmit(&self) -> bool {
        self.attempt <= self.max_retries
    }

    /// Whether the sequence reached `Complete` or `Failed`
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Signal resolved with the terminal state
    ///
    /// Replaces any earlier receiver. Resolves immediately if the sequence
    /// already finished.
    pub fn completion(&mut self) -> oneshot::Receiver<SequenceState> {
        let (tx, rx) = oneshot::channel();
        if self.state.is_terminal() {
            let _ = tx.send(self.state);
        } else {
            self.completion = Some(tx);
        }
        rx
    }

    /// Mark the request as sent
    pub fn start(&mut self) -> Result<(), SequenceError> {
        if self.state != SequenceState::Pending {
            return Err(self.illegal(SequenceOperation::Start));
        }

        match self.flow {
            CommandFlow::UnackFrame => self.set_state(SequenceState::Complete),
            _ => self.set_state(SequenceState::WaitingForAck),
        }
        Ok(())
    }

    /// Record the ACK for the request
    pub fn acknowledge_request(&mut self) -> Result<(), SequenceError> {
        if self.state != SequenceState::WaitingForAck {
            return Err(self.illegal(SequenceOperation::AcknowledgeRequest));
        }

        let next = match self.flow {
            CommandFlow::AckFrame => SequenceState::Complete,
            CommandFlow::AckFrameWithResponse | CommandFlow::AckFrameWithResponseAndCallback => {
                SequenceState::WaitingForResponse
            }
            CommandFlow::AckFrameWithCallback => SequenceState::WaitingForCallback,
            CommandFlow::UnackFrame | CommandFlow::Unsolicited => {
                return Err(self.illegal(SequenceOperation::AcknowledgeRequest))
            }
        };
        self.set_state(next);
        Ok(())
    }

    /// Record the response frame
    ///
    /// Accepted while still waiting for the ACK, in case the ACK was lost.
    pub fn update_response(&mut self, response: Command) -> Result<(), SequenceError> {
        if !matches!(
            self.state,
            SequenceState::WaitingForResponse | SequenceState::WaitingForAck
        ) {
            return Err(self.illegal(SequenceOperation::UpdateResponse));
        }

        let next = match self.flow {
            CommandFlow::AckFrameWithResponse => SequenceState::Complete,
            CommandFlow::AckFrameWithResponseAndCallback => SequenceState::WaitingForCallback,
            _ => return Err(self.illegal(SequenceOperation::UpdateResponse)),
        };
        self.response = Some(response);
        self.set_state(next);
        Ok(())
    }

    /// Record the callback from the module
    pub fn update_callback(&mut self, callback: Command) -> Result<(), SequenceError> {
        if self.state != SequenceState::WaitingForCallback {
            return Err(self.illegal(SequenceOperation::UpdateCallback));
        }

        match self.flow {
            CommandFlow::AckFrameWithCallback | CommandFlow::AckFrameWithResponseAndCallback => {
                self.callback = Some(callback);
                self.set_state(SequenceState::Complete);
                Ok(())
            }
            _ => Err(self.illegal(SequenceOperation::UpdateCallback)),
        }
    }

    /// Count another attempt and return to `Pending`
    pub fn retry(&mut self) {
        self.attempt += 1;
        self.state = SequenceState::Pending;
    }

    pub fn mark_as_failed(&mut self) {
        self.set_state(SequenceState::Failed);
    }

    fn set_state(&mut self, state: SequenceState) {
        self.state = state;
        if state.is_terminal() {
            if let Some(completion) = self.completion.take() {
                let _ = completion.send(state);
            }
        }
    }

    fn illegal(&self, operation: SequenceOperation) -> SequenceError {
        SequenceError::IllegalStateTransition {
            state: self.state,
            operation,
        }
    }
}
