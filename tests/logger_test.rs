mod common;

use common::{ScriptedConnector, eventually, test_config};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use watchman_log_shipper::app::{Logger, Orchestrator, pump_lines};
use watchman_log_shipper::buffer::EnqueueError;
use watchman_log_shipper::domain::Severity;

async fn started_logger(min_level: Severity) -> (ScriptedConnector, Logger<ScriptedConnector>) {
    let connector = ScriptedConnector::accepting();
    let orchestrator = Orchestrator::with_connector(&test_config(), connector.clone()).unwrap();
    orchestrator.start().await.unwrap();
    (connector, Logger::new(Arc::new(orchestrator), min_level))
}

#[tokio::test]
async fn test_severity_methods_map_to_levels() {
    let (connector, logger) = started_logger(Severity::Debug).await;

    assert!(logger.debug("d"));
    assert!(logger.info("i"));
    assert!(logger.success("s"));
    assert!(logger.warning("w"));
    assert!(logger.error("e"));
    assert!(logger.failure("f"));
    assert!(logger.critical("c"));

    assert!(eventually(Duration::from_secs(2), || connector.records().len() == 7).await);
    let levels: Vec<Severity> = connector.records().iter().map(|r| r.level).collect();
    assert_eq!(levels, Severity::ALL.to_vec());
}

#[tokio::test]
async fn test_records_below_min_level_are_filtered() {
    let (_connector, logger) = started_logger(Severity::Warning).await;

    assert!(!logger.enabled(Severity::Success));
    assert!(!logger.debug("ignored"));
    assert!(!logger.info("ignored"));
    assert!(logger.warning("kept"));
    assert!(logger.critical("kept"));

    assert_eq!(logger.log_value("INFO", json!("ignored"), None), Ok(false));
    assert_eq!(logger.log_value("ERROR", json!("kept"), None), Ok(true));
    assert_eq!(
        logger.log_value("shout", json!("bad"), None),
        Err(EnqueueError::InvalidLevel("shout".to_string()))
    );
}

#[tokio::test]
async fn test_log_with_payload() {
    let (connector, logger) = started_logger(Severity::Debug).await;
    let payload = json!({"order_id": 17, "amount": 9.5}).as_object().cloned();

    assert!(logger.log(Severity::Success, "payment captured", payload));
    assert!(eventually(Duration::from_secs(2), || connector.records().len() == 1).await);

    let record = &connector.records()[0];
    assert_eq!(record.message, "payment captured");
    assert_eq!(record.payload["order_id"], 17);
}

#[tokio::test]
async fn test_pump_lines_ships_json_and_plain_text() {
    let (connector, logger) = started_logger(Severity::Info).await;
    let input = concat!(
        "{\"level\":\"ERROR\",\"message\":\"db down\",\"payload\":{\"db\":\"primary\"}}\n",
        "plain text line\n",
        "\n",
        "{\"level\":\"DEBUG\",\"message\":\"filtered\"}\n",
        "{\"level\":\"INFO\",\"message\":42}\n",
        "{\"level\":30,\"message\":\"numeric level\"}\n",
    );

    let summary = pump_lines(&logger, BufReader::new(input.as_bytes()))
        .await
        .unwrap();
    assert_eq!(summary.lines, 5);
    assert_eq!(summary.accepted, 3);
    assert_eq!(summary.refused, 1);
    assert_eq!(summary.malformed, 1);

    assert!(eventually(Duration::from_secs(2), || connector.records().len() == 3).await);
    let records = connector.records();
    assert_eq!(records[0].level, Severity::Error);
    assert_eq!(records[0].payload["db"], "primary");
    assert_eq!(records[1].level, Severity::Info);
    assert_eq!(records[1].message, "plain text line");
    assert_eq!(records[2].level, Severity::Warning);
}
