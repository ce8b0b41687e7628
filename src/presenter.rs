use crate::engine::display_name;
use crate::event::ActionStatus;
use crate::tracker::ProgressState;

/// Opaque presentation output. The Telegram transport maps this directly onto
/// `send_message`/`edit_message_text`; other transports may use `entities`
/// differently or ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
}

/// Default character budget for the action list body (§4.5).
pub const DEFAULT_BODY_BUDGET: usize = 3500;

/// Pure function turning a `ProgressState` snapshot into `RenderedMessage`.
///
/// Composes header (engine + elapsed time), body (action list, trimmed to
/// `body_budget` bytes while keeping the most recent entries), and footer
/// (resume hint, final answer excerpt). Header and footer are never trimmed.
pub struct Presenter {
    pub body_budget: usize,
}

impl Default for Presenter {
    fn default() -> Self {
        Self {
            body_budget: DEFAULT_BODY_BUDGET,
        }
    }
}

impl Presenter {
    pub fn render(&self, state: &ProgressState) -> RenderedMessage {
        let header = render_header(state);
        let body = render_body(state, self.body_budget);
        let footer = render_footer(state);

        let mut parts = vec![header];
        if !body.is_empty() {
            parts.push(body);
        }
        if !footer.is_empty() {
            parts.push(footer);
        }

        RenderedMessage {
            text: parts.join("\n\n"),
        }
    }
}

fn render_header(state: &ProgressState) -> String {
    let engine = state
        .engine_id
        .as_ref()
        .map(|e| display_name(e.as_str()).to_string())
        .unwrap_or_else(|| "engine".to_string());
    let elapsed = format_elapsed(state.elapsed());
    if state.finished {
        let status = match state.ok {
            Some(true) => "done",
            Some(false) => "failed",
            None => "finished",
        };
        format!("{engine} — {status} ({elapsed})")
    } else {
        format!("{engine} — working ({elapsed})")
    }
}

fn render_body(state: &ProgressState, budget: usize) -> String {
    if state.actions.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = state
        .actions
        .iter()
        .map(|a| {
            let marker = match a.status {
                ActionStatus::Pending => "□",
                ActionStatus::Running => "▶",
                ActionStatus::Done => "✓",
                ActionStatus::Warning => "!",
                ActionStatus::Error => "✗",
            };
            format!("{marker} {}", a.title)
        })
        .collect();

    trim_to_budget(&lines, budget)
}

/// Keep the most recent lines that fit within `budget` bytes, prefixing with
/// an ellipsis marker if earlier lines were dropped.
fn trim_to_budget(lines: &[String], budget: usize) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut total = 0usize;
    for line in lines.iter().rev() {
        let additional = line.len() + 1;
        if total + additional > budget && !kept.is_empty() {
            break;
        }
        total += additional;
        kept.push(line.as_str());
    }
    kept.reverse();

    // The ellipsis prefix itself counts against `budget`; drop further lines
    // until the prefixed result fits, rather than only budgeting the body.
    loop {
        let dropped = lines.len() - kept.len();
        if dropped == 0 {
            return kept.join("\n");
        }
        let prefix = format!("… ({dropped} earlier steps)\n");
        let body = kept.join("\n");
        if prefix.len() + body.len() <= budget || kept.len() <= 1 {
            return format!("{prefix}{body}");
        }
        kept.remove(0);
    }
}

fn render_footer(state: &ProgressState) -> String {
    let mut lines = Vec::new();
    if let Some(token) = &state.resume_token {
        lines.push(format!("resume: {}", token.raw));
    }
    if state.finished {
        if let Some(answer) = &state.answer {
            lines.push(answer.clone());
        }
        if let Some(err) = &state.error {
            lines.push(format!("error: {err}"));
        }
    }
    lines.join("\n")
}

fn format_elapsed(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineId;
    use crate::tracker::Action;

    #[test]
    fn header_and_footer_preserved_when_body_trimmed() {
        let mut state = ProgressState::new();
        state.engine_id = Some(EngineId::new("codex").unwrap());
        state.resume_token = Some(crate::runner::ResumeToken::new(
            EngineId::new("codex").unwrap(),
            "codex resume abc",
        ));
        for i in 0..500 {
            state.actions.push(Action {
                id: Some(i.to_string()),
                kind: Some("tool".into()),
                title: format!("step number {i} doing a reasonably long thing"),
                status: ActionStatus::Done,
                detail: None,
            });
        }
        state.finished = true;
        state.ok = Some(true);
        state.answer = Some("final answer text".into());

        let presenter = Presenter { body_budget: 200 };
        let rendered = presenter.render(&state);

        assert!(rendered.text.contains("codex resume abc"));
        assert!(rendered.text.contains("final answer text"));
        assert!(rendered.text.contains("earlier steps"));
    }

    #[test]
    fn empty_state_renders_header_only() {
        let state = ProgressState::new();
        let presenter = Presenter::default();
        let rendered = presenter.render(&state);
        assert!(rendered.text.contains("working"));
    }
}
