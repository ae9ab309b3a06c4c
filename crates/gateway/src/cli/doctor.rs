//! `mcpb-gateway doctor` — validates configuration and the environment the
//! broker expects to find at boot, without actually starting anything.

use mcpb_domain::config::{Config, ConfigSeverity};

/// Returns `true` if the broker would start cleanly with `config`.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("mcpb-gateway doctor — {config_path}");
    let mut ok = true;

    let issues = config.validate();
    for issue in &issues {
        println!("{issue}");
        if issue.severity == ConfigSeverity::Error {
            ok = false;
        }
    }

    check_env("admin token", &config.auth.admin_token_env, false, &mut ok);
    check_env("local token HMAC secret", &config.auth.hmac_secret_env, false, &mut ok);
    for key in &config.auth.internal_service_keys {
        check_env(&format!("internal service key '{}'", key.name), &key.env, false, &mut ok);
    }

    if config.auth.idp.is_configured() {
        println!("OK: idp configured (issuer={})", config.auth.idp.issuer.as_deref().unwrap_or(""));
    } else {
        println!("WARN: no idp configured, only local admin/HMAC/internal-service credentials will authenticate");
    }

    for builtin in &config.providers.builtins {
        if builtin.is_disabled() {
            println!("INFO: provider '{}' is disabled via {:?}", builtin.name, builtin.disabled_by);
        } else {
            println!("OK: provider '{}' enabled (command={})", builtin.name, builtin.command);
        }
    }

    if ok {
        println!("doctor: all checks passed");
    } else {
        println!("doctor: one or more checks failed");
    }
    Ok(ok)
}

fn check_env(label: &str, var: &str, required: bool, ok: &mut bool) {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => println!("OK: {label} ({var}) is set"),
        _ if required => {
            println!("ERROR: {label} ({var}) is not set");
            *ok = false;
        }
        _ => println!("WARN: {label} ({var}) is not set"),
    }
}
