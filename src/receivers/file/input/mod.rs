// SPDX-License-Identifier: Apache-2.0

//! File discovery and line extraction primitives shared by the prospector and harvesters.

mod file_id;
mod finder;
mod fingerprint;
mod reader;

pub use file_id::FileId;
pub(crate) use file_id::is_unlinked;
pub use finder::FileFinder;
pub use fingerprint::Fingerprint;
pub use reader::{Line, LineSplitter};

use serde::{Deserialize, Serialize};

/// Where to start reading a file that has no registry state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    #[default]
    Beginning,
    /// Start reading from the end of the file (only new content). Applies to
    /// files present during the first scan, files created later are read in full.
    End,
}

impl std::str::FromStr for StartAt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "beginning" => Ok(StartAt::Beginning),
            "end" => Ok(StartAt::End),
            _ => Err(format!(
                "Invalid start position '{}'. Valid options: beginning, end",
                s
            )),
        }
    }
}
