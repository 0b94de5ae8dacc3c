//! Business logic services

pub mod chunked_importer;
pub mod import_job;
pub mod import_processor;
pub mod import_translator;
pub mod job_history;
pub mod memory_guard;
pub mod progress;
pub mod record_store;
pub mod row_validator;
pub mod spreadsheet_reader;
pub mod upload;
