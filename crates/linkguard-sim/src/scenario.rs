/// Built-in scenario: one group, one admin, one offender.
///
/// The admin enables enforcement and whitelists `example.com`, posts a
/// link of their own, then the offender posts a whitelisted link
/// followed by `violations` spam links.
use std::sync::Arc;
use std::time::Instant;

use linkguard::{
    GroupId, MemoryDirectory, MessageEvent, ModerationConfig, ModerationService, Participant,
    SettingsStore, StaticResolver, UserId,
};
use serde::Serialize;

use crate::events::{emit, EventOutcome, EventSummary};

#[derive(Serialize)]
struct Classified {
    message_id: String,
    sender: UserId,
    verdict: linkguard::Verdict,
}

pub async fn run(
    config: ModerationConfig,
    settings: Arc<dyn SettingsStore>,
    violations: u32,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let group = GroupId::new("120363000000@g.us");
    let admin = UserId::new("111@s.whatsapp.net");
    let offender = UserId::new("222@s.whatsapp.net");

    let directory = MemoryDirectory::new();
    directory.set_membership(
        &group,
        vec![
            Participant::with_role(admin.clone(), "superadmin"),
            Participant::member(offender.clone()),
        ],
    );

    let service = ModerationService::init(
        config,
        Arc::new(directory.clone()),
        settings,
        Arc::new(StaticResolver::new(["spam.io", "example.com"])),
    )
    .await?;

    service.set_enforcement(&group, &admin, true).await?;
    service.set_whitelist(&group, &admin, ["example.com"]).await?;

    let mut script = vec![
        (admin.clone(), "admin-1".to_string(), "our site: https://spam.io".to_string()),
        (offender.clone(), "ok-1".to_string(), "docs at example.com/page".to_string()),
    ];
    for i in 1..=violations {
        script.push((offender.clone(), format!("spam-{i}"), format!("cheap stuff at spam.io/{i}")));
    }

    for (line, (sender, message_id, text)) in script.into_iter().enumerate() {
        let verdict = service
            .handle_message(MessageEvent {
                group: group.clone(),
                message_id: message_id.clone(),
                sender: sender.clone(),
                text,
                from_self: false,
            })
            .await;
        emit(&EventOutcome::new(
            line + 1,
            Classified {
                message_id,
                sender,
                verdict,
            },
        ));
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
