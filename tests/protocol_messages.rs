use gs_worker::protocol::{Command, ConvertRequest, Dpi};
use serde_json::json;

#[test]
fn convert_command_is_tagged_by_kind() {
    let cmd = Command::Convert(ConvertRequest {
        document: vec![1, 2],
        dpi: Dpi::D300,
        grayscale: true,
        first_page: Some(2),
        last_page: None,
    });
    let v = serde_json::to_value(&cmd).unwrap();
    assert_eq!(v["kind"], "convert");
    assert_eq!(v["payload"]["dpi"], 300);
    assert!(v["payload"].get("last_page").is_none());
}

#[test]
fn dpi_outside_the_supported_set_is_rejected() {
    let raw = json!({
        "kind": "convert",
        "payload": { "document": [], "dpi": 100 }
    });
    assert!(serde_json::from_value::<Command>(raw).is_err());
    assert_eq!(Dpi::default().value(), 150);
}
