//! Transaction building, submission and fee / gas escalation

mod builder;
mod gas;
mod sender;

pub use builder::{execute_contract_msg, SignedTx, TxBuilder, TxRequest};
pub use gas::EscalationPolicy;
pub use sender::{TransactionSender, TxOutcome};
