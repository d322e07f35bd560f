//! Security invariant tests for the Orange edge services.
//!
//! These scan the production sources of every crate in the workspace and run
//! on each `cargo test --workspace`, so a refactor cannot silently weaken the
//! trust boundary.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs source files from production crates (excluding tests, test
/// helpers, and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit")
            || path_str.contains("tests/")
            || path_str.contains("\\tests\\")
            || path_str.ends_with("testutil.rs")
        {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    assert!(
        files.len() > 10,
        "expected to scan the workspace sources, found only {} files",
        files.len()
    );
    files
}

/// Drop everything from the first `#[cfg(test)]` or `mod tests` onward.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            break;
        }
        result.push(line);
    }

    result.join("\n")
}

fn file_named<'a>(files: &'a [(String, String)], suffix: &str) -> &'a str {
    files
        .iter()
        .find(|(path, _)| path.replace('\\', "/").ends_with(suffix))
        .map(|(_, content)| content.as_str())
        .unwrap_or_else(|| panic!("{suffix} not found in workspace"))
}

#[test]
fn no_hardcoded_secrets_in_production_code() {
    let hex_64_re = Regex::new(r"[a-fA-F0-9]{64}").unwrap();
    let dev_secret_re = Regex::new(r#"(?i)"[^"]*secret-key[^"]*""#).unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for (i, line) in prod_content.lines().enumerate() {
            assert!(
                !hex_64_re.is_match(line) && !dev_secret_re.is_match(line),
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn hmac_verify_has_no_early_return() {
    let files = production_source_files();
    let content = file_named(&files, "orange-trust/src/hmac.rs");

    let func_start = content
        .find("pub fn verify_hmac")
        .expect("verify_hmac not found");
    let func_body = &content[func_start..];
    let func_end = func_body[1..].find("\n}").map(|i| i + 2).unwrap_or(func_body.len());
    let func_text = &func_body[..func_end];

    assert!(
        !func_text.contains("return "),
        "verify_hmac must always reach the MAC comparison; malformed signatures \
         are compared against a zero MAC instead of returning early"
    );
    assert!(
        func_text.contains("verify_slice"),
        "verify_hmac must compare through Mac::verify_slice (constant time)"
    );
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 A redirect could send the forwarded bearer token or callback signature \
                 to an unintended host.",
                path
            );
        }
    }
}

#[test]
fn http_clients_have_timeouts() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];
            assert!(
                builder_chain.contains(".timeout("),
                "reqwest::Client::builder() at {} has no request timeout",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("subtle::") || prod_content.contains("use subtle"),
                "File {} defines constant_time_eq without the subtle crate. \
                 Use orange::security::constant_time_eq.",
                path
            );
        }
    }
}

#[test]
fn secret_comparisons_are_constant_time() {
    let naive_re = Regex::new(r"(token|secret|signature)\w*\s*==\s*\w*(token|secret|signature)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            assert!(
                !naive_re.is_match(line),
                "Possible non-constant-time secret comparison at {}:{}: {}",
                path,
                i + 1,
                line.trim()
            );
        }
    }
}

#[test]
fn no_insecure_jwt_decoding() {
    let forbidden = [
        "insecure_disable_signature_validation",
        "dangerous_insecure_decode",
        "Algorithm::none",
    ];

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        for pattern in forbidden {
            assert!(
                !prod_content.contains(pattern),
                "{} uses {}; tokens must always be signature-checked",
                path,
                pattern
            );
        }
    }
}

#[test]
fn symmetric_jwt_algorithms_are_refused() {
    let files = production_source_files();
    let token = production_lines(file_named(&files, "orange-trust/src/token.rs"));

    for alg in ["Algorithm::HS256", "Algorithm::HS384", "Algorithm::HS512"] {
        assert!(
            token.contains(alg),
            "token verification must explicitly refuse {alg}: a public JWK must never \
             be usable as an HMAC secret"
        );
    }
    assert!(token.contains("FORBIDDEN_ALGORITHMS"));
}

#[test]
fn fail_open_is_confined_to_the_revocation_gate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if !prod_content.contains("FailOpen") {
            continue;
        }
        let normalized = path.replace('\\', "/");
        assert!(
            normalized.ends_with("orange-trust/src/revocation.rs")
                || normalized.ends_with("orange-trust/src/admission.rs"),
            "FailOpen used in {}. Only the denylist lookup may admit a request on an \
             infrastructure error.",
            path
        );
    }
}

#[test]
fn denylist_lookup_is_bounded() {
    let files = production_source_files();
    let revocation = production_lines(file_named(&files, "orange-trust/src/revocation.rs"));
    assert!(
        revocation.contains("tokio::time::timeout("),
        "the denylist lookup must run under a timeout so a stalled store cannot hang requests"
    );
}

#[test]
fn admission_matches_only_sanitized_paths() {
    let files = production_source_files();
    let gateway = production_lines(file_named(&files, "orange-gateway/src/routes/gateway.rs"));
    let middleware = production_lines(file_named(&files, "orange-gateway/src/middleware.rs"));

    assert!(
        gateway.contains(r#"decoded.contains("..")"#),
        "sanitize_path must refuse any `..` in the decoded path"
    );
    assert!(
        gateway.contains(r"decoded.contains('\\')"),
        "sanitize_path must refuse backslashes, which URL parsers treat as `/`"
    );

    let sanitize_at = middleware
        .find("sanitize_path(req.path())")
        .expect("admission filter no longer sanitizes the path");
    let public_at = middleware
        .find("is_public(&state")
        .expect("admission filter no longer checks public paths");
    assert!(
        sanitize_at < public_at,
        "the path must be sanitized before public-prefix matching"
    );
}

#[test]
fn callbacks_are_always_signed() {
    let files = production_source_files();
    let emitter = production_lines(file_named(&files, "orange-trust/src/emitter.rs"));

    let posts = emitter.matches(".post(").count();
    assert!(posts > 0, "callback emitter no longer posts anything");
    assert_eq!(
        posts,
        emitter.matches(".header(SIGNATURE_HEADER").count(),
        "every callback POST must carry the signature header"
    );
    assert!(
        emitter.contains(".bearer_auth("),
        "callbacks must forward the caller's bearer token"
    );
}

#[test]
fn error_responses_do_not_leak_internals() {
    let dangerous_patterns = [
        "redis://",
        "RedisError",
        "stack trace",
        "RUST_BACKTRACE",
        "e.to_string()",
        "msg)",
    ];

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse") {
            continue;
        }

        let prod_content = production_lines(content);

        for (i, line) in prod_content.lines().enumerate() {
            if !line.contains("json!") && !line.contains("\"message\"") {
                continue;
            }
            for pattern in &dangerous_patterns {
                assert!(
                    !line.contains(pattern),
                    "Potentially sensitive detail '{}' in an HTTP response at {}:{}. \
                     Internal details should be logged server-side only.",
                    pattern,
                    path,
                    i + 1
                );
            }
        }
    }
}

#[test]
fn secrets_are_redacted_in_debug_output() {
    let secret_field_re = Regex::new(r"pub (\w*secret\w*|metrics_token):").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if !secret_field_re.is_match(&prod_content) {
            continue;
        }
        assert!(
            prod_content.contains("[REDACTED]"),
            "{} holds a secret field but has no redacting Debug impl",
            path
        );
    }
}
