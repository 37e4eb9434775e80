//! Wire vocabulary for the Cognigy socket endpoint.
//!
//! This crate only describes what travels over the socket. It has no I/O:
//!
//! - `events`: the event names exchanged with the backend.
//! - `outbound`: payloads the client emits (`init`, `processInput`, resets, injections).
//! - `inbound`: payload shapes the backend emits (`output`, errors, `finalPing`, replies).
//! - `outcome`: the classification of one inbound event into a single outcome kind.

pub mod events;
pub mod inbound;
pub mod outbound;
pub mod outcome;

pub use inbound::{AiOutput, CorrelatedPayload, ErrorResponse, FinalPing, FlowOutput, OutputType};
pub use outbound::{
    ClientCommand, InitRequest, InjectRequest, InputEvent, InputMessage, ResetFlowRequest,
    SessionRef,
};
pub use outcome::{
    CorrelatedReply, ErrorNotice, InboundEvent, NoticeSource, OutcomeEnvelope, ReplyKind,
};
