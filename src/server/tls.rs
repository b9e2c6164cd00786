//! TLS material for the admission webhook
//!
//! Two sources are supported:
//! - a mounted certificate directory (`tls.crt` / `tls.key`), the usual
//!   cert-manager setup
//! - self-managed certificates: a CA and server cert are generated on first
//!   start, kept in a Secret, and the CA is written into the
//!   ValidatingWebhookConfiguration's `caBundle`
//!
//! ## Certificate Chain
//! ```text
//! Self-signed CA (evictguard-webhook-ca)
//!     └── Server cert (evictguard.evictguard-system.svc)
//! ```

use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Default validity period for CA certificate (10 years)
pub const CA_VALIDITY_DAYS: u32 = 3650;

/// Default validity period for server certificate (1 year)
pub const SERVER_VALIDITY_DAYS: u32 = 365;

/// Secret keys for storing certificate data
pub const SECRET_CA_CERT_KEY: &str = "ca.crt";
pub const SECRET_SERVER_CERT_KEY: &str = "tls.crt";
pub const SECRET_SERVER_KEY_KEY: &str = "tls.key";

/// Default secret name for self-managed webhook TLS
pub const DEFAULT_TLS_SECRET_NAME: &str = "evictguard-webhook-tls";

const MANAGED_BY: &str = "evictguard";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(#[from] rcgen::Error),

    #[error("Failed to serialize certificate: {0}")]
    Serialization(String),

    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Invalid PEM data")]
    InvalidPem,
}

/// Certificate and key the HTTPS listener presents
#[derive(Clone)]
pub struct ServingCertificate {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Generated CA plus the server certificate it signed
#[derive(Clone)]
pub struct CertificateBundle {
    /// PEM-encoded CA certificate, published as the webhook `caBundle`
    pub ca_cert_pem: String,
    pub server: ServingCertificate,
}

/// Read `tls.crt` and `tls.key` from a mounted certificate directory
pub fn load_from_dir(dir: &Path) -> Result<ServingCertificate, TlsError> {
    let read = |name: &str| {
        let path = dir.join(name);
        std::fs::read_to_string(&path).map_err(|source| TlsError::Io { path, source })
    };

    Ok(ServingCertificate {
        cert_pem: read(SECRET_SERVER_CERT_KEY)?,
        key_pem: read(SECRET_SERVER_KEY_KEY)?,
    })
}

fn generate_ca() -> Result<(Certificate, KeyPair), TlsError> {
    let mut params = CertificateParams::default();

    params
        .distinguished_name
        .push(DnType::CommonName, "evictguard-webhook-ca");
    params
        .distinguished_name
        .push(DnType::OrganizationName, MANAGED_BY);

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CA_VALIDITY_DAYS as i64);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    Ok((cert, key_pair))
}

/// DNS names the API server may use to reach the webhook Service
fn service_dns_names(service_name: &str, namespace: &str) -> Result<Vec<SanType>, TlsError> {
    [
        service_name.to_string(),
        format!("{}.{}", service_name, namespace),
        format!("{}.{}.svc", service_name, namespace),
        format!("{}.{}.svc.cluster.local", service_name, namespace),
    ]
    .into_iter()
    .map(|name| {
        name.clone()
            .try_into()
            .map(SanType::DnsName)
            .map_err(|e| TlsError::Serialization(format!("Invalid DNS name {}: {}", name, e)))
    })
    .collect()
}

fn generate_server_cert(
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    service_name: &str,
    namespace: &str,
) -> Result<ServingCertificate, TlsError> {
    let mut params = CertificateParams::default();

    params
        .distinguished_name
        .push(DnType::CommonName, service_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, MANAGED_BY);
    params.subject_alt_names = service_dns_names(service_name, namespace)?;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(SERVER_VALIDITY_DAYS as i64);

    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, ca_cert, ca_key)?;

    Ok(ServingCertificate {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Generate a CA and a server certificate for `service_name.namespace.svc`
pub fn generate_certificate_bundle(
    service_name: &str,
    namespace: &str,
) -> Result<CertificateBundle, TlsError> {
    let (ca_cert, ca_key) = generate_ca()?;
    let server = generate_server_cert(&ca_cert, &ca_key, service_name, namespace)?;

    Ok(CertificateBundle {
        ca_cert_pem: ca_cert.pem(),
        server,
    })
}

/// Load a previously generated bundle, `None` if the Secret does not exist
pub async fn load_from_secret(
    client: &Client,
    namespace: &str,
    secret_name: &str,
) -> Result<Option<CertificateBundle>, TlsError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let secret = match secrets.get_opt(secret_name).await? {
        Some(secret) => secret,
        None => return Ok(None),
    };
    let data = secret.data.unwrap_or_default();

    let field = |key: &str| {
        data.get(key)
            .map(|b| String::from_utf8_lossy(&b.0).to_string())
            .ok_or_else(|| TlsError::Parse(format!("Missing {} in secret", key)))
    };

    Ok(Some(CertificateBundle {
        ca_cert_pem: field(SECRET_CA_CERT_KEY)?,
        server: ServingCertificate {
            cert_pem: field(SECRET_SERVER_CERT_KEY)?,
            key_pem: field(SECRET_SERVER_KEY_KEY)?,
        },
    }))
}

/// Build the `kubernetes.io/tls` Secret holding a bundle
pub fn bundle_secret(
    namespace: &str,
    secret_name: &str,
    bundle: &CertificateBundle,
) -> Secret {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    let data = BTreeMap::from([
        (
            SECRET_CA_CERT_KEY.to_string(),
            ByteString(bundle.ca_cert_pem.as_bytes().to_vec()),
        ),
        (
            SECRET_SERVER_CERT_KEY.to_string(),
            ByteString(bundle.server.cert_pem.as_bytes().to_vec()),
        ),
        (
            SECRET_SERVER_KEY_KEY.to_string(),
            ByteString(bundle.server.key_pem.as_bytes().to_vec()),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                MANAGED_BY.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Create the Secret, or merge-patch it when it already exists
pub async fn save_to_secret(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    bundle: &CertificateBundle,
) -> Result<(), TlsError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = bundle_secret(namespace, secret_name, bundle);

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 409 => {
            secrets
                .patch(secret_name, &PatchParams::default(), &Patch::Merge(&secret))
                .await?;
            Ok(())
        }
        Err(e) => Err(TlsError::Kube(e)),
    }
}

/// Set `caBundle` on every webhook of the configuration
///
/// Returns false when nothing changed.
pub fn inject_ca_bundle(config: &mut ValidatingWebhookConfiguration, ca_cert_pem: &str) -> bool {
    let bundle = ByteString(ca_cert_pem.as_bytes().to_vec());
    let mut changed = false;

    for webhook in config.webhooks.iter_mut().flatten() {
        if webhook.client_config.ca_bundle.as_ref() != Some(&bundle) {
            webhook.client_config.ca_bundle = Some(bundle.clone());
            changed = true;
        }
    }
    changed
}

/// Publish the CA to the ValidatingWebhookConfiguration named `config_name`
pub async fn patch_webhook_ca_bundle(
    client: &Client,
    config_name: &str,
    ca_cert_pem: &str,
) -> Result<(), TlsError> {
    let configs: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());

    let mut config = configs.get(config_name).await?;
    if inject_ca_bundle(&mut config, ca_cert_pem) {
        configs
            .replace(config_name, &PostParams::default(), &config)
            .await?;
        info!(config = config_name, "Patched webhook configuration with CA bundle");
    }
    Ok(())
}

/// Load or generate the self-managed serving certificate
///
/// 1. Load the bundle from the Secret, or generate and save a new one
/// 2. Publish the CA to the ValidatingWebhookConfiguration named after the
///    service (failure is logged; the configuration may not exist yet)
pub async fn initialize_tls(
    client: &Client,
    service_name: &str,
    namespace: &str,
    secret_name: &str,
) -> Result<ServingCertificate, TlsError> {
    let bundle = match load_from_secret(client, namespace, secret_name).await? {
        Some(bundle) => {
            info!(
                secret = secret_name,
                "Loaded existing TLS certificates from Secret"
            );
            bundle
        }
        None => {
            info!("No existing TLS certificates found, generating new ones");
            let bundle = generate_certificate_bundle(service_name, namespace)?;
            save_to_secret(client, namespace, secret_name, &bundle).await?;
            info!(secret = secret_name, "Saved new TLS certificates to Secret");
            bundle
        }
    };

    if let Err(e) = patch_webhook_ca_bundle(client, service_name, &bundle.ca_cert_pem).await {
        warn!(error = ?e, "Failed to patch webhook configuration with CA bundle (may not exist yet)");
    }

    Ok(bundle.server)
}

/// Build a rustls ServerConfig from a serving certificate
pub fn build_rustls_config(
    serving: &ServingCertificate,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    use rustls::pki_types::CertificateDer;
    use rustls_pemfile::{certs, private_key};
    use std::io::BufReader;

    let cert_chain: Vec<CertificateDer<'static>> =
        certs(&mut BufReader::new(serving.cert_pem.as_bytes()))
            .filter_map(|r| r.ok())
            .collect();

    if cert_chain.is_empty() {
        return Err(TlsError::InvalidPem);
    }

    let key = private_key(&mut BufReader::new(serving.key_pem.as_bytes()))
        .map_err(|e| TlsError::Parse(format!("Failed to parse private key: {}", e)))?
        .ok_or(TlsError::InvalidPem)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TlsError::Parse(format!("Failed to set protocol versions: {}", e)))?
    .with_no_client_auth()
    .with_single_cert(cert_chain, key)
    .map_err(|e| TlsError::Parse(format!("Failed to build TLS config: {}", e)))?;

    Ok(Arc::new(config))
}
