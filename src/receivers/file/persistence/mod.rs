// SPDX-License-Identifier: Apache-2.0

mod json_file;
mod schema;

pub use json_file::{JsonFileStore, LoadedRegistry};
pub use schema::{PersistedEntryV1, REGISTRY_VERSION, RegistryDocumentV1};
