use serde::{Deserialize, Serialize};

/// Wire encoding of a message store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Binary message format.
    #[default]
    Bmf,
    /// Printable text counterpart of BMF.
    Pml,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Bmf => write!(f, "BMF"),
            Encoding::Pml => write!(f, "PML"),
        }
    }
}
