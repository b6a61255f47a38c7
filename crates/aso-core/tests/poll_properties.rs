//! Property tests over random backend response sequences

use aso_core::{OrchestratorConfig, SessionEvent, SessionOrchestrator, SessionStatus, SourceError};
use aso_session::{can_transition, SessionRecord, TransitionCause};
use aso_test_utils::{running, session_id, Call, ScriptedBackend};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Response {
    Status(SessionStatus),
    Transient,
}

fn response_strategy() -> impl Strategy<Value = Response> {
    prop_oneof![
        4 => prop::sample::select(SessionStatus::ALL.to_vec()).prop_map(Response::Status),
        1 => Just(Response::Transient),
    ]
}

fn responses_strategy() -> impl Strategy<Value = Vec<Response>> {
    prop::collection::vec(response_strategy(), 1..20)
}

struct Outcome {
    accepted: Vec<SessionStatus>,
    final_status: SessionStatus,
    polling: bool,
    ready_events: usize,
    status_calls: usize,
}

fn drive(responses: &[Response]) -> Outcome {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let backend = Arc::new(ScriptedBackend::new());
        let id = session_id();
        backend.on_create(Ok(running(&id, 0, 10)));
        for (step, response) in (1u32..).zip(responses) {
            let scripted = match response {
                Response::Status(status) => {
                    Ok(SessionRecord::new(id.clone(), *status).with_progress(step, 10))
                }
                Response::Transient => Err(SourceError::Timeout),
            };
            backend.on_status(id.clone(), scripted);
        }

        let orchestrator = SessionOrchestrator::new(
            Arc::clone(&backend),
            OrchestratorConfig::new().with_poll_interval(Duration::from_secs(1)),
        )
        .unwrap();
        let mut events = orchestrator.subscribe();
        orchestrator.create(&json!({})).await.unwrap();

        let scripted = u64::try_from(responses.len()).unwrap();
        tokio::time::sleep(Duration::from_millis(scripted * 1_000 + 500)).await;

        let mut accepted = Vec::new();
        let mut ready_events = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Updated(record) => accepted.push(record.status),
                SessionEvent::BecameReady(_) => ready_events += 1,
                _ => {}
            }
        }
        let snapshot = orchestrator.session(&id).unwrap();
        Outcome {
            accepted,
            final_status: snapshot.status(),
            polling: orchestrator.is_polling(&id),
            ready_events,
            status_calls: backend.calls(Call::Status),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn accepted_updates_follow_the_graph(responses in responses_strategy()) {
        let outcome = drive(&responses);

        for pair in outcome.accepted.windows(2) {
            prop_assert!(
                can_transition(pair[0], pair[1], TransitionCause::Observed),
                "{:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
        prop_assert_eq!(outcome.accepted.last().copied(), Some(outcome.final_status));
    }

    #[test]
    fn polling_ends_exactly_at_first_terminal(responses in responses_strategy()) {
        let outcome = drive(&responses);

        let first_terminal = responses.iter().position(|r| {
            matches!(r, Response::Status(status) if status.is_terminal())
        });
        match first_terminal {
            Some(index) => {
                prop_assert!(!outcome.polling);
                prop_assert_eq!(outcome.status_calls, index + 1);
                prop_assert!(outcome.final_status.is_terminal());
                let expected_ready = usize::from(
                    matches!(responses[index], Response::Status(SessionStatus::Ready)),
                );
                prop_assert_eq!(outcome.ready_events, expected_ready);
            }
            None => {
                prop_assert!(outcome.polling);
                prop_assert_eq!(outcome.status_calls, responses.len());
                prop_assert_eq!(outcome.final_status, SessionStatus::Running);
                prop_assert_eq!(outcome.ready_events, 0);
            }
        }
    }
}
