//! Accounting module (double-entry ledger, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod chart;
pub mod ledger;

pub use chart::{AccountCodes, ChartOfAccounts};
pub use ledger::{
    Account, AccountKind, JournalCommand, JournalEntryLine, JournalEntryPosted,
    JournalEntryReversed, JournalSource, Ledger, LedgerEvent, LedgerId, PostJournalEntry,
    ReverseJournalEntry,
};
