use super::*;
use std::collections::HashMap;

fn config_from(vars: &[(&str, &str)]) -> Config {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn test_local_flag_detected() {
    assert!(is_local_mode(["evictguard", "--local"]));
    assert!(!is_local_mode(["evictguard"]));
    assert!(!is_local_mode(["evictguard", "--localhost"]));
}

#[test]
fn test_serve_mode_defaults_to_cert_dir() {
    let config = config_from(&[]);

    assert_eq!(
        serve_mode(&config),
        ServeMode::CertDir(PathBuf::from("/tmp/k8s-webhook-server/serving-certs"))
    );
}

#[test]
fn test_serve_mode_self_signed_wins_over_cert_dir() {
    let config = config_from(&[
        ("EVICTGUARD_SELF_SIGNED_TLS", "true"),
        ("CERT_DIR", "/certs"),
    ]);

    assert_eq!(serve_mode(&config), ServeMode::SelfSigned);
}

#[test]
fn test_serve_mode_local_is_plain_http() {
    let config = Config {
        cert_dir: None,
        self_signed_tls: false,
        ..config_from(&[])
    };

    assert_eq!(serve_mode(&config), ServeMode::Plain);
}
