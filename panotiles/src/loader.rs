//! Tenant config loading from the object store.

use anyhow::Result;
use panotiles_core::{ClientConfig, ServiceError, parse_client_config, service_error};
use panotiles_derive::context;
use panotiles_store::ObjectStore;
use serde_json::Value;

/// Object-store key of a tenant's config document.
pub fn client_config_key(client_id: &str) -> String {
	format!("clients/{client_id}/{client_id}_cfg.json")
}

/// Fetches, parses and validates the tenant config, returning the normalized
/// project plus the free-form `naming` object.
///
/// A missing document stays *not-found*; a document that exists but is not
/// valid JSON becomes *config-invalid*.
#[context("loading config of client '{client_id}'")]
pub async fn load_client_config(store: &dyn ObjectStore, client_id: &str) -> Result<(ClientConfig, Value)> {
	let key = client_config_key(client_id);
	let raw = match store.get_json(&key).await {
		Ok(raw) => raw,
		Err(err) => {
			if service_error(&err).is_none() && err.chain().any(|c| c.downcast_ref::<serde_json::Error>().is_some()) {
				return Err(ServiceError::ConfigInvalid(format!("config of client '{client_id}' is not valid JSON")).into());
			}
			return Err(err);
		}
	};
	parse_client_config(client_id, raw)
}
