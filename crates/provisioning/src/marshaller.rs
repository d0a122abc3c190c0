//! Parameter marshaller: builds the provider-agnostic parameter bag for one
//! module call from a (Service, Product, Server, Client) tuple. Secrets are
//! decrypted here, at build time, and live only inside the returned bag.

use std::collections::HashMap;

use hostforge_core::types::{Client, ClientDetails, ParameterBag, Product, Server, Service};
use hostforge_core::{ProvisionError, ProvisionResult};
use hostforge_vault::CredentialVault;

/// Build a fresh parameter bag. Product module config is the base layer;
/// service config options override it on key collision. A credential that
/// fails to authenticate aborts the build; the engine never proceeds with
/// an empty secret in place of a real one.
pub fn build(
    service: &Service,
    product: &Product,
    server: &Server,
    client: &Client,
    vault: &CredentialVault,
) -> ProvisionResult<ParameterBag> {
    let password = decrypt_optional(vault, service.password_enc.as_deref())?;
    let server_password = decrypt_optional(vault, server.password_enc.as_deref())?;

    let mut config_options: HashMap<String, String> = product.module_config.clone();
    config_options.extend(
        service
            .config_options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    Ok(ParameterBag {
        service_id: service.id,
        product_id: product.id,
        server_id: server.id,
        domain: service.domain.clone(),
        username: service.username.clone(),
        password,
        server_host: server.hostname.clone(),
        server_ip: server.ip.clone(),
        server_port: server.port,
        server_secure: server.secure,
        server_username: server.username.clone(),
        server_password,
        client: ClientDetails::from(client),
        config_options,
    })
}

/// An absent credential marshals to an empty string (the provider will
/// generate one); a present-but-corrupt credential is fatal.
fn decrypt_optional(vault: &CredentialVault, ciphertext: Option<&str>) -> ProvisionResult<String> {
    match ciphertext {
        Some(ciphertext) => vault
            .decrypt(ciphertext)
            .map_err(|_| ProvisionError::CorruptCredential),
        None => Ok(String::new()),
    }
}
