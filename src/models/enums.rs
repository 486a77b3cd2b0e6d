use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Stored lifecycle status. "Processing" is intentionally absent: it is derived
// from processing-set membership, see `DisplayStatus`.
str_enum!(DocumentStatus {
    Pending => "pending",
    Uploaded => "uploaded",
    Approved => "approved",
});

str_enum!(CacheKind {
    Validation => "validation",
    CrossVerification => "cross_verification",
});

str_enum!(DisplayStatus {
    Pending => "pending",
    Processing => "processing",
    Uploaded => "uploaded",
    Approved => "approved",
});

impl DocumentStatus {
    /// Uploaded or Approved: the document no longer blocks batch completion.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Approved)
    }
}

impl DisplayStatus {
    pub fn derive(status: DocumentStatus, processing: bool) -> Self {
        if processing {
            return Self::Processing;
        }
        match status {
            DocumentStatus::Pending => Self::Pending,
            DocumentStatus::Uploaded => Self::Uploaded,
            DocumentStatus::Approved => Self::Approved,
        }
    }
}
