pub mod attempt;
pub mod batch;
pub mod comparison;
pub mod execution;
pub mod question;
pub mod summary;

pub use attempt::{Attempt, RetryStatus, TransientFailure};
pub use batch::{BatchError, BatchFile, QuestionRecord, SCHEMA_VERSION};
pub use comparison::{Comparison, ComparisonOutcome, Metrics};
pub use execution::{ErrorDescriptor, ErrorKind, ExecutionResult};
pub use question::{Question, QuestionId};
pub use summary::RunSummary;
