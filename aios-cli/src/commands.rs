//! Handlers for each CLI verb (spec §6). Each function owns one verb's
//! side effects and `println!` output; `main` only parses arguments and
//! dispatches.

use crate::app::App;
use aios_types::{Action, Event, EventFilter, Priority, Severity};
use serde_json::Value;

fn parse_severity(raw: &str) -> anyhow::Result<Severity> {
    match raw.to_ascii_uppercase().as_str() {
        "INFO" => Ok(Severity::Info),
        "WARN" => Ok(Severity::Warn),
        "ERR" | "ERROR" => Ok(Severity::Err),
        "CRIT" | "CRITICAL" => Ok(Severity::Crit),
        other => anyhow::bail!("unknown severity `{other}` (expected info|warn|err|crit)"),
    }
}

fn parse_priority(raw: &str) -> anyhow::Result<Priority> {
    match raw.to_ascii_uppercase().as_str() {
        "P0" => Ok(Priority::P0),
        "P1" => Ok(Priority::P1),
        "P2" => Ok(Priority::P2),
        "P3" => Ok(Priority::P3),
        other => anyhow::bail!("unknown priority `{other}` (expected p0|p1|p2|p3)"),
    }
}

fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(raw)?)
}

fn event_layer(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

pub async fn emit(app: &App, event_type: String, severity: Option<String>, payload: Option<String>) -> anyhow::Result<()> {
    let severity = severity.as_deref().map(parse_severity).transpose()?.unwrap_or(Severity::Info);
    let payload = payload.as_deref().map(parse_payload).transpose()?.unwrap_or_else(|| serde_json::json!({}));
    let layer = event_layer(&event_type).to_string();
    let event = Event::new(event_type, "cli", severity, layer, payload);
    let id = event.id;
    app.bus.emit(event)?;
    app.settle().await;
    println!("emitted {id}");
    Ok(())
}

pub async fn enqueue(app: &App, action_type: String, target: Option<String>, params: Option<String>, priority: Option<String>) -> anyhow::Result<()> {
    let priority = priority.as_deref().map(parse_priority).transpose()?.unwrap_or(Priority::P2);
    let params = params.as_deref().map(parse_payload).transpose()?.unwrap_or_else(|| serde_json::json!({}));
    let target = target.unwrap_or_else(|| "cli".to_string());
    let action = Action::new(action_type, target, params, priority, None);
    let action_id = action.action_id;
    let outcome = app.action_queue.enqueue(action).await;
    app.settle().await;
    println!("action {action_id} -> {:?}", outcome.status);
    if let Some(reason) = outcome.skip_reason {
        println!("skip_reason: {reason}");
    }
    Ok(())
}

pub fn status(app: &App, as_json: bool) -> anyhow::Result<()> {
    let playbooks = app.reactor.playbooks();
    let enabled = playbooks.iter().filter(|p| p.enabled).count();
    let breaker_keys = app.breaker.keys();
    let breakers: Vec<Value> = breaker_keys
        .iter()
        .map(|key| {
            let s = app.breaker.status(key);
            serde_json::json!({"key": key, "state": s.state, "trigger_count": s.trigger_count, "failure_count": s.failure_count})
        })
        .collect();
    let score = app.score.score();
    let event_count = app.bus.count_events(&EventFilter::default());
    let budget = app.action_queue.resource_budget();
    let (budget_consumed, budget_ceiling) = (budget.consumed(), budget.ceiling());

    if as_json {
        let snapshot = serde_json::json!({
            "score": score,
            "events_recorded": event_count,
            "playbooks_total": playbooks.len(),
            "playbooks_enabled": enabled,
            "breakers": breakers,
            "budget_consumed": budget_consumed,
            "budget_ceiling": budget_ceiling,
            "budget_under_pressure": budget.under_pressure(),
        });
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("score: {score:.3}");
        println!("events recorded: {event_count}");
        println!("budget: {budget_consumed:.1}/{budget_ceiling:.1}{}", if budget.under_pressure() { " (under pressure)" } else { "" });
        println!("playbooks: {enabled}/{} enabled", playbooks.len());
        if breakers.is_empty() {
            println!("breakers: no activity observed this session");
        } else {
            println!("breakers:");
            for b in &breakers {
                let key = b["key"].as_str().unwrap_or_default();
                let state = b["state"].as_str().unwrap_or_default();
                println!("  {key} -> {state} (triggers={}, failures={})", b["trigger_count"], b["failure_count"]);
            }
        }
    }
    Ok(())
}

pub fn history(app: &App, limit: usize) -> anyhow::Result<()> {
    let mut receipts = app.receipts.load_all()?;
    receipts.sort_by_key(|r| std::cmp::Reverse(r.finalized_at));
    receipts.truncate(limit);

    if receipts.is_empty() {
        println!("no terminal actions recorded");
        return Ok(());
    }
    for r in receipts {
        let outcome = match &r.skip_reason {
            Some(reason) => format!("{:?} ({reason})", r.status),
            None => format!("{:?}", r.status),
        };
        println!("{} {} -> {outcome} target={} attempts={}", r.finalized_at.to_rfc3339(), r.action_type, r.target, r.attempts);
    }
    Ok(())
}

pub fn playbooks_list(app: &App) -> anyhow::Result<()> {
    let catalog = aios_reactor::catalog::load(&app.paths.playbooks_file())?;
    if catalog.is_empty() {
        println!("no playbooks in catalog");
        return Ok(());
    }
    for pb in catalog {
        println!("{} [{}] {} risk={:?} cooldown={}s", pb.id, if pb.enabled { "enabled" } else { "disabled" }, pb.name, pb.risk, pb.cooldown_sec);
    }
    Ok(())
}

pub fn playbooks_reload(app: &App) -> anyhow::Result<()> {
    let catalog = aios_reactor::catalog::load(&app.paths.playbooks_file())?;
    println!("reloaded {} playbook(s) from {}", catalog.len(), app.paths.playbooks_file().display());
    Ok(())
}

fn set_playbook_enabled(app: &App, id: &str, enabled: bool) -> anyhow::Result<()> {
    let path = app.paths.playbooks_file();
    let mut catalog = aios_reactor::catalog::load(&path)?;
    let Some(pb) = catalog.iter_mut().find(|p| p.id == id) else {
        anyhow::bail!("no playbook with id `{id}` in catalog");
    };
    pb.enabled = enabled;
    aios_reactor::catalog::save(&path, &catalog)?;
    println!("playbook {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub fn playbooks_disable(app: &App, id: &str) -> anyhow::Result<()> {
    set_playbook_enabled(app, id, false)
}

pub fn playbooks_enable(app: &App, id: &str) -> anyhow::Result<()> {
    set_playbook_enabled(app, id, true)
}

pub fn circuit_status(app: &App) -> anyhow::Result<()> {
    let keys = app.breaker.keys();
    if keys.is_empty() {
        println!("no circuit activity observed this session");
        return Ok(());
    }
    for key in keys {
        let s = app.breaker.status(&key);
        println!("{key}: {:?} (triggers={}, failures={})", s.state, s.trigger_count, s.failure_count);
    }
    Ok(())
}

pub fn circuit_reset(app: &App, key: &str) -> anyhow::Result<()> {
    app.breaker.reset(key);
    println!("circuit breaker for `{key}` reset to CLOSED");
    Ok(())
}

