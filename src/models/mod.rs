pub mod case;
pub mod enums;
pub mod validation;
pub mod verification;

pub use case::{CaseSnapshot, DocumentRecord};
pub use enums::{CacheKind, DisplayStatus, DocumentStatus};
pub use validation::{RawValidationBatch, RawValidationRule, ValidationRule, ValidationState};
pub use verification::{CrossVerificationResult, VerificationIssue};
