use narcissus_core::config::AppConfig;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig) {
    let checks = vec![
        check_model_key(config),
        check_search_key(config),
        check_search_provider(config),
        check_workflow(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

/// A key is usable when present and not an unexpanded `${VAR}` reference.
fn key_is_set(key: Option<&str>) -> bool {
    key.map_or(false, |k| !k.is_empty() && !k.starts_with("${"))
}

fn check_model_key(config: &AppConfig) -> CheckResult {
    let model = &config.model;
    // Local endpoints (Ollama, vLLM) usually run without a key.
    let needs_key = model.base_url.is_none();

    if !needs_key || key_is_set(model.api_key.as_deref()) {
        CheckResult {
            label: "Model".into(),
            ok: true,
            detail: format!("{} via {}", model.model_id, model.provider),
        }
    } else {
        CheckResult {
            label: "Model".into(),
            ok: false,
            detail: "No API key set (model.api_key or OPENAI_API_KEY)".into(),
        }
    }
}

fn check_search_key(config: &AppConfig) -> CheckResult {
    if key_is_set(config.search.api_key.as_deref()) {
        CheckResult {
            label: "Search".into(),
            ok: true,
            detail: format!("{} ({} depth)", config.search.provider, config.search.search_depth),
        }
    } else {
        CheckResult {
            label: "Search".into(),
            ok: false,
            detail: "No API key set (search.api_key or TAVILY_API_KEY)".into(),
        }
    }
}

fn check_search_provider(config: &AppConfig) -> CheckResult {
    match narcissus_search::create_client(&config.search) {
        Ok(_) => CheckResult {
            label: "Search provider".into(),
            ok: true,
            detail: format!("'{}' supported", config.search.provider),
        },
        Err(e) => CheckResult {
            label: "Search provider".into(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

fn check_workflow(config: &AppConfig) -> CheckResult {
    let workflow = &config.workflow;
    let ok = workflow.search_workers > 0 && workflow.timeout_secs > 0;
    CheckResult {
        label: "Workflow".into(),
        ok,
        detail: format!(
            "{} search workers, {}s timeout, {:?} research",
            workflow.search_workers, workflow.timeout_secs, workflow.research_policy
        ),
    }
}
