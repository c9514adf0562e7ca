mod common;

use common::{harness, plant, with_structure, SAMPLE_DICTIONARY, SERVER_URL};
use serde_json::json;
use ua_gateway_error::GatewayError;
use ua_gateway_models::NodeType;
use ua_gateway_sdk::{DeadbandType, NodeId, StatusCode, UaValue};

#[tokio::test]
async fn test_read_variable() -> anyhow::Result<()> {
    let h = harness(plant());

    let node = h.gateway.read_node(SERVER_URL, "2-Speed").await?;
    assert_eq!(node.node_id, "2-Speed");
    assert_eq!(node.name, "Speed");
    assert_eq!(node.node_type, NodeType::Variable);
    assert_eq!(node.value, Some(json!(12.5)));
    assert_eq!(node.status.as_deref(), Some("Good"));
    assert_eq!(node.minimum_sampling_interval, Some(100.0));
    assert_eq!(node.dead_band, vec![DeadbandType::Absolute, DeadbandType::None]);
    let schema = node.value_schema.expect("variable carries a schema");
    assert_eq!(schema["anyOf"][0], json!({"type": "number"}));
    Ok(())
}

#[tokio::test]
async fn test_read_enumeration_carries_label() -> anyhow::Result<()> {
    let h = harness(plant());

    let node = h.gateway.read_node(SERVER_URL, "2-Mode").await?;
    assert_eq!(node.value, Some(json!({"EnumValue": 1, "EnumLabel": "Auto"})));
    assert_eq!(node.dead_band, vec![DeadbandType::None]);
    Ok(())
}

#[tokio::test]
async fn test_read_structure_through_type_dictionary() -> anyhow::Result<()> {
    let server = plant();
    with_structure(&server, SAMPLE_DICTIONARY.as_bytes());
    let h = harness(server);

    let node = h.gateway.read_node(SERVER_URL, "2-Sample").await?;
    assert_eq!(node.value, Some(json!({"count": 2, "values": [10, 20]})));
    assert_eq!(node.dead_band, vec![DeadbandType::None]);
    let schema = node.value_schema.expect("structure carries a schema");
    assert_eq!(schema["type"], json!("object"));
    assert_eq!(schema["properties"]["values"]["minItems"], json!(2));
    assert_eq!(schema["properties"]["values"]["maxItems"], json!(2));
    Ok(())
}

#[tokio::test]
async fn test_read_structure_without_usable_dictionary() -> anyhow::Result<()> {
    common::init_tracing();
    let raw = json!({
        "TypeId": "ns=2;i=4001",
        "Encoding": "Binary",
        "Body": "020000000a00000014000000",
    });

    // dictionary that does not declare the type
    let server = plant();
    with_structure(
        &server,
        br#"<opc:TypeDictionary xmlns:opc="http://opcfoundation.org/BinarySchema/"/>"#,
    );
    let h = harness(server);
    let node = h.gateway.read_node(SERVER_URL, "2-Sample").await?;
    assert_eq!(node.value, Some(raw.clone()));

    // dictionary that is not text
    let server = plant();
    with_structure(&server, &[0xFF, 0xFE, 0x00]);
    let h = harness(server);
    let node = h.gateway.read_node(SERVER_URL, "2-Sample").await?;
    assert_eq!(node.value, Some(raw));
    assert!(node.value_schema.is_some());
    Ok(())
}

#[tokio::test]
async fn test_read_classifies_objects() -> anyhow::Result<()> {
    let h = harness(plant());

    let line = h.gateway.read_node(SERVER_URL, "2-Line1").await?;
    assert_eq!(line.node_type, NodeType::Folder);
    assert!(line.value.is_none());

    let pump = h.gateway.read_node(SERVER_URL, "2-Pump").await?;
    assert_eq!(pump.node_type, NodeType::Object);

    let reset = h.gateway.read_node(SERVER_URL, "2-Reset").await?;
    assert_eq!(reset.node_type, NodeType::Method);
    Ok(())
}

#[tokio::test]
async fn test_read_unknown_and_malformed_ids() {
    let h = harness(plant());

    let err = h.gateway.read_node(SERVER_URL, "2-Missing").await.unwrap_err();
    assert!(matches!(err, GatewayError::NodeNotFound(_)), "{err}");

    let err = h.gateway.read_node(SERVER_URL, "Speed").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidNodeId(_)), "{err}");
}

#[tokio::test]
async fn test_short_read_response_is_an_error() {
    let server = plant();
    server.short_reads(true);
    let h = harness(server);

    let err = h.gateway.read_node(SERVER_URL, "2-Speed").await.unwrap_err();
    assert!(matches!(err, GatewayError::ServerUnavailable { .. }), "{err}");

    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Count", &json!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ServerUnavailable { .. }), "{err}");
    assert!(h.server.writes().is_empty());
}

#[tokio::test]
async fn test_browse_lists_children_in_order() -> anyhow::Result<()> {
    let h = harness(plant());

    let edges = h.gateway.browse(SERVER_URL, "2-Line1").await?;
    let summary: Vec<(&str, NodeType, &str)> = edges
        .iter()
        .map(|e| (e.node_id.as_str(), e.node_type, e.relationship.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("2-Speed", NodeType::Variable, "HasComponent"),
            ("2-Count", NodeType::Variable, "HasComponent"),
            ("2-Mode", NodeType::Variable, "HasComponent"),
            ("2-Pump", NodeType::Object, "HasComponent"),
            ("2-Reset", NodeType::Method, "HasComponent"),
        ]
    );

    let roots = h.gateway.browse(SERVER_URL, "0-85").await?;
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "Line1");
    assert_eq!(roots[0].node_type, NodeType::Folder);
    assert_eq!(roots[0].relationship, "Organizes");
    Ok(())
}

#[tokio::test]
async fn test_write_then_read_back() -> anyhow::Result<()> {
    let h = harness(plant());

    h.gateway.write_node(SERVER_URL, "2-Count", &json!(42)).await?;
    assert_eq!(
        h.server.writes(),
        vec![(NodeId::string(2, "Count"), UaValue::Int32(42))]
    );

    let node = h.gateway.read_node(SERVER_URL, "2-Count").await?;
    assert_eq!(node.value, Some(json!(42)));
    Ok(())
}

#[tokio::test]
async fn test_write_type_mismatch_is_not_sent() {
    let h = harness(plant());

    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Count", &json!("42"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ValueTypeMismatch { .. }), "{err}");

    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Count", &json!(3_000_000_000_i64))
        .await
        .unwrap_err();
    assert!(err.is_caller_error(), "{err}");
    assert!(h.server.writes().is_empty());
}

#[tokio::test]
async fn test_write_refused() {
    let server = plant();
    server.read_only(&NodeId::string(2, "Speed"));
    let h = harness(server);

    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Speed", &json!(1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NodeNotWritable(_)), "{err}");

    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Pump", &json!(1))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NodeNotWritable(_)), "{err}");

    h.server.reject_writes(StatusCode::BAD_OUT_OF_RANGE);
    let err = h
        .gateway
        .write_node(SERVER_URL, "2-Count", &json!(5))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::OutOfRange { .. }), "{err}");
}
