pub mod state_machine;

pub use state_machine::{
    FulfillmentHooks, NoopFulfillment, OrderStateMachine, StatusChanged, TransitionError, TransitionOutcome,
    TransitionValidation, is_valid_transition,
};
