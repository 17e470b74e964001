use std::process::Command;

fn run(fixture: &str) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_topup-core"))
        .arg("tests/fixtures/settings.toml")
        .arg(&path)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_events() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,group,quota,rebate_quota,topup_count");
    // payer credited twice, referrer rebated once, duplicate notification ignored
    assert_eq!(lines[1], "1,default,7500000,0,2");
    assert_eq!(lines[2], "7,default,0,500000,0");
    assert_eq!(lines[3], "8,vip,10000000,0,1");
    assert_eq!(lines.len(), 4);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized event type 'refund'"));
    assert!(stderr.contains("payment method 'paypal' is not available"));
    assert!(stderr.contains("unknown order reference 'zz'"));
    assert!(stderr.contains("order missing amount"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "user,group,quota,rebate_quota,topup_count");
    assert_eq!(lines[1], "1,default,5000000,0,1");
}

#[test]
fn missing_settings_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_topup-core"))
        .arg("tests/fixtures/missing.toml")
        .arg("tests/fixtures/valid.csv")
        .output()
        .expect("failed to run binary");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn usage_without_arguments() {
    let output = Command::new(env!("CARGO_BIN_EXE_topup-core"))
        .output()
        .expect("failed to run binary");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage: topup-core"));
}
