/// Replay of newline-delimited JSON events.
///
/// One event per line, tagged by `type`:
///
/// ```text
/// {"type":"membership","group":"1@g.us","participants":[{"id":"a@x","role":"admin"}]}
/// {"type":"enforce","group":"1@g.us","actor":"a@x","enabled":true}
/// {"type":"whitelist","group":"1@g.us","actor":"a@x","entries":["example.com"]}
/// {"type":"message","group":"1@g.us","message_id":"m1","sender":"b@x","text":"spam.io"}
/// {"type":"participants","group":"1@g.us","participants":["b@x"],"action":"promote"}
/// {"type":"notice","group":"1@g.us","stub_code":30,"stub_params":["b@x"]}
/// ```
///
/// Blank lines and lines starting with `#` are skipped. Lines that fail to
/// parse are reported and skipped.
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use linkguard::{
    DomainResolver, GroupId, HistoryNotice, MemoryDirectory, MessageEvent, ModerationConfig,
    ModerationError, ModerationService, Participant, ParticipantsUpdate, SettingsStore, UserId,
};
use serde::{Deserialize, Serialize};

use crate::events::{emit, EventOutcome, EventRejected, EventSummary};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayEvent {
    /// Seed the simulated directory.
    Membership {
        group: GroupId,
        participants: Vec<Participant>,
    },
    Enforce {
        group: GroupId,
        actor: UserId,
        enabled: bool,
    },
    Whitelist {
        group: GroupId,
        actor: UserId,
        entries: Vec<String>,
    },
    Message(MessageEvent),
    Participants(ParticipantsUpdate),
    Notice(HistoryNotice),
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Outcome {
    Seeded { members: usize },
    Classified { verdict: linkguard::Verdict },
    Applied,
    Updated,
    Refused { error: String },
}

impl From<Result<(), ModerationError>> for Outcome {
    fn from(result: Result<(), ModerationError>) -> Self {
        match result {
            Ok(()) => Outcome::Updated,
            Err(e) => Outcome::Refused {
                error: e.to_string(),
            },
        }
    }
}

fn parse_line(line: &str) -> Option<Result<ReplayEvent, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

async fn apply(service: &ModerationService, directory: &MemoryDirectory, event: ReplayEvent) -> Outcome {
    match event {
        ReplayEvent::Membership {
            group,
            participants,
        } => {
            let members = participants.len();
            directory.set_membership(&group, participants);
            service.invalidate(&group);
            Outcome::Seeded { members }
        }
        ReplayEvent::Enforce {
            group,
            actor,
            enabled,
        } => service.set_enforcement(&group, &actor, enabled).await.into(),
        ReplayEvent::Whitelist {
            group,
            actor,
            entries,
        } => service
            .set_whitelist(&group, &actor, entries)
            .await
            .map(|_| ())
            .into(),
        ReplayEvent::Message(message) => Outcome::Classified {
            verdict: service.handle_message(message).await,
        },
        ReplayEvent::Participants(update) => {
            service.handle_participants_update(&update);
            Outcome::Applied
        }
        ReplayEvent::Notice(notice) => {
            service.handle_history_notice(&notice);
            Outcome::Applied
        }
    }
}

pub async fn run(
    config: ModerationConfig,
    settings: Arc<dyn SettingsStore>,
    resolver: Arc<dyn DomainResolver>,
    file: &Path,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let reader: Box<dyn BufRead> = if file.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let f = std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?;
        Box::new(BufReader::new(f))
    };

    let directory = MemoryDirectory::new();
    let service = ModerationService::init(config, Arc::new(directory.clone()), settings, resolver).await?;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        match parse_line(&line) {
            None => continue,
            Some(Err(e)) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed event");
                emit(&EventRejected::new(line_no, e));
            }
            Some(Ok(event)) => {
                let outcome = apply(&service, &directory, event).await;
                emit(&EventOutcome::new(line_no, outcome));
            }
        }
    }

    service.wait_idle().await;
    emit(&EventSummary::new(
        start.elapsed().as_millis() as u64,
        directory.calls(),
        service.metrics(),
    ));
    service.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_event_kind() {
        let lines = [
            r#"{"type":"membership","group":"1@g.us","participants":[{"id":"A@x","role":"admin"}]}"#,
            r#"{"type":"enforce","group":"1@g.us","actor":"a@x","enabled":true}"#,
            r#"{"type":"whitelist","group":"1@g.us","actor":"a@x","entries":["example.com"]}"#,
            r#"{"type":"message","group":"1@g.us","message_id":"m1","sender":"b@x","text":"spam.io"}"#,
            r#"{"type":"participants","group":"1@g.us","participants":["b@x"],"action":"promote"}"#,
            r#"{"type":"notice","group":"1@g.us","stub_code":30,"stub_params":["b@x"]}"#,
        ];
        for line in lines {
            assert!(matches!(parse_line(line), Some(Ok(_))), "{line}");
        }
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# seed data").is_none());
        assert!(matches!(parse_line("{\"type\":\"bogus\"}"), Some(Err(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_events_drive_the_service() {
        let directory = MemoryDirectory::new();
        let service = ModerationService::init(
            ModerationConfig::default(),
            Arc::new(directory.clone()),
            Arc::new(linkguard::MemorySettingsStore::new()),
            Arc::new(linkguard::StaticResolver::any()),
        )
        .await
        .unwrap();

        let script = [
            r#"{"type":"membership","group":"1@g.us","participants":[{"id":"a@x","role":"admin"},{"id":"b@x"}]}"#,
            r#"{"type":"enforce","group":"1@g.us","actor":"a@x","enabled":true}"#,
            r#"{"type":"message","group":"1@g.us","message_id":"m1","sender":"b@x","text":"spam.io"}"#,
        ];
        let mut outcomes = Vec::new();
        for line in script {
            let event = parse_line(line).unwrap().unwrap();
            outcomes.push(serde_json::to_value(apply(&service, &directory, event).await).unwrap());
        }
        service.wait_idle().await;

        assert_eq!(outcomes[0]["kind"], "seeded");
        assert_eq!(outcomes[1]["kind"], "updated");
        assert_eq!(outcomes[2]["verdict"]["verdict"], "enqueued");
        assert_eq!(directory.delete_attempts(), vec!["m1"]);
    }
}
