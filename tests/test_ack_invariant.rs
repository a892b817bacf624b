//! Property tests for the acknowledgement invariant
//!
//! Whatever mix of bodies and handler outcomes arrives, every delivery is
//! acknowledged exactly once and in delivery order, and the handler sees
//! exactly the deliveries whose body is valid UTF-8.

use broadcast_relay::pump::{process_delivery, DeliveryOutcome};
use broadcast_relay::testing::{MockBroker, RecordingHandler};
use broadcast_relay::transport::{BrokerConnector, BrokerSession};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
struct ScriptedDelivery {
    namespace: String,
    body: Vec<u8>,
}

fn scripted_delivery() -> impl Strategy<Value = ScriptedDelivery> {
    let namespace = prop_oneof![
        Just("ok".to_string()),
        Just("fails".to_string()),
        Just("panics".to_string()),
        "[a-z.]{0,12}",
    ];
    let body = prop_oneof![
        ".{0,40}".prop_map(String::into_bytes),
        proptest::collection::vec(any::<u8>(), 0..40),
    ];
    (namespace, body).prop_map(|(namespace, body)| ScriptedDelivery { namespace, body })
}

fn run_script(
    script: &[ScriptedDelivery],
    fail_acks: bool,
) -> (MockBroker, RecordingHandler, Vec<DeliveryOutcome>) {
    tokio_test::block_on(async {
        let broker = MockBroker::new();
        let handler = RecordingHandler::new();
        handler.fail_on("fails");
        handler.panic_on("panics");
        broker.set_fail_acks(fail_acks);

        let mut session = broker.connect().await.unwrap();
        for delivery in script {
            broker.deliver(&delivery.namespace, delivery.body.clone());
        }

        let mut outcomes = Vec::new();
        while let Some(delivery) = session
            .next_delivery(Duration::from_millis(1))
            .await
            .unwrap()
        {
            let report = process_delivery(&session, &handler, delivery).await;
            assert_eq!(report.acked, !fail_acks);
            outcomes.push(report.outcome);
        }

        (broker, handler, outcomes)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_delivery_is_acked_exactly_once_in_order(
        script in proptest::collection::vec(scripted_delivery(), 0..20)
    ) {
        let (broker, _, outcomes) = run_script(&script, false);

        prop_assert_eq!(outcomes.len(), script.len());
        prop_assert_eq!(broker.acked(), broker.delivered());
        prop_assert_eq!(broker.ack_attempts(), broker.delivered());
        prop_assert!(broker.max_in_flight() <= 1);
    }

    #[test]
    fn handler_sees_exactly_the_decodable_deliveries(
        script in proptest::collection::vec(scripted_delivery(), 0..20)
    ) {
        let (_, handler, outcomes) = run_script(&script, false);

        let expected: Vec<(String, String)> = script
            .iter()
            .filter_map(|d| {
                String::from_utf8(d.body.clone())
                    .ok()
                    .map(|message| (d.namespace.clone(), message))
            })
            .collect();
        prop_assert_eq!(handler.received(), expected);

        for (delivery, outcome) in script.iter().zip(&outcomes) {
            let expected_outcome = if std::str::from_utf8(&delivery.body).is_err() {
                DeliveryOutcome::DecodeFailed
            } else if delivery.namespace == "fails" || delivery.namespace == "panics" {
                DeliveryOutcome::HandlerFailed
            } else {
                DeliveryOutcome::Dispatched
            };
            prop_assert_eq!(*outcome, expected_outcome);
        }
    }

    #[test]
    fn failed_acks_are_still_attempted_once_each(
        script in proptest::collection::vec(scripted_delivery(), 1..10)
    ) {
        let (broker, _, outcomes) = run_script(&script, true);

        prop_assert_eq!(outcomes.len(), script.len());
        prop_assert_eq!(broker.ack_attempts(), broker.delivered());
        prop_assert!(broker.acked().is_empty());
    }
}
