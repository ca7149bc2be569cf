use conductor_adapters::GithubCode;
use conductor_core::ports::CodePort;

#[test]
fn push_webhook_extracts_branch_from_ref() {
    let code = GithubCode::new("token", "acme", "widgets", "shh");
    let body = br#"{"ref":"refs/heads/release"}"#;

    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(b"shh").unwrap();
    use hmac::Mac;
    mac.update(body);
    let sig = format!("sha256={}", mac.finalize().into_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>());

    let headers = vec![
        ("x-hub-signature-256".to_string(), sig),
        ("x-github-event".to_string(), "push".to_string()),
    ];

    let branch = code.parse_webhook_for_branch(body, &headers).unwrap();
    assert_eq!(branch, Some("release".to_string()));
}

#[test]
fn non_push_events_are_ignored() {
    let code = GithubCode::new("token", "acme", "widgets", "shh");
    let body = br#"{"ref":"refs/heads/release"}"#;

    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(b"shh").unwrap();
    use hmac::Mac;
    mac.update(body);
    let sig = format!("sha256={}", mac.finalize().into_bytes().iter().map(|b| format!("{b:02x}")).collect::<String>());

    let headers = vec![
        ("x-hub-signature-256".to_string(), sig),
        ("x-github-event".to_string(), "ping".to_string()),
    ];

    let branch = code.parse_webhook_for_branch(body, &headers).unwrap();
    assert_eq!(branch, None);
}

#[test]
fn tampered_body_fails_signature_check() {
    let code = GithubCode::new("token", "acme", "widgets", "shh");
    let headers = vec![
        ("x-hub-signature-256".to_string(), "sha256=0000".to_string()),
        ("x-github-event".to_string(), "push".to_string()),
    ];
    let body = br#"{"ref":"refs/heads/release"}"#;
    assert!(code.parse_webhook_for_branch(body, &headers).is_err());
}
