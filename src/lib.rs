//! Lambda functions behind the chatbot's knowledge base and admin pages.
//!
//! Each binary under `src/bin` wires AWS clients into one of the handlers
//! here: [`s3_events`], [`evaluations`] and [`load_excel`].

pub mod config;
pub mod error;
pub mod evaluations;
pub mod knowledge_base;
pub mod load_excel;
pub mod response;
pub mod s3_events;
pub mod spreadsheet;
pub mod telemetry;
