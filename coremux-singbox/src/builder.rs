//! sing-box config builder
//!
//! The target schema differs from the generic inbound shape, so every
//! protocol gets an explicit allow-list mapping; settings without a
//! mapping rule are dropped rather than passed through, and malformed
//! sub-fields are omitted instead of failing the whole build.

use serde_json::{json, Map, Value};

use coremux_core::{ConfigBuilder, Error, InboundConfig, Protocol, Result};

pub struct SingBoxConfigBuilder {
    template: Vec<u8>,
}

impl SingBoxConfigBuilder {
    pub fn new(template: Vec<u8>) -> Self {
        Self { template }
    }
}

impl ConfigBuilder for SingBoxConfigBuilder {
    fn build(&self, inbounds: &[InboundConfig]) -> Result<Vec<u8>> {
        let mut doc: Value = serde_json::from_slice(&self.template)
            .map_err(|e| Error::Config(format!("sing-box template is not valid JSON: {}", e)))?;
        let root = doc
            .as_object_mut()
            .ok_or_else(|| Error::Config("sing-box template root must be an object".into()))?;

        let rendered: Vec<Value> = inbounds
            .iter()
            .filter(|inbound| inbound.enable)
            .map(render_inbound)
            .collect();
        root.insert("inbounds".to_string(), Value::Array(rendered));

        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    fn template(&self) -> &[u8] {
        &self.template
    }
}

fn render_inbound(inbound: &InboundConfig) -> Value {
    let mut result = Map::new();
    result.insert("tag".into(), json!(inbound.tag));
    result.insert("type".into(), json!(inbound.protocol));
    result.insert("listen".into(), json!(inbound.listen));
    // sing-box names the port field listen_port
    result.insert("listen_port".into(), json!(inbound.port));

    match inbound.protocol {
        Protocol::Vmess => map_clients(&mut result, &inbound.settings, &[("alterId", "alterId")]),
        Protocol::Vless => map_clients(&mut result, &inbound.settings, &[("flow", "flow")]),
        Protocol::Trojan => map_trojan_clients(&mut result, &inbound.settings),
        Protocol::Shadowsocks => copy_fields(&mut result, &inbound.settings, &["method", "password"]),
        Protocol::Hysteria => copy_fields(
            &mut result,
            &inbound.settings,
            &["up", "down", "obfs", "auth", "auth_str"],
        ),
        Protocol::Hysteria2 => map_hysteria2(&mut result, &inbound.settings),
        Protocol::Tuic => copy_fields(&mut result, &inbound.settings, &["users", "congestion_control"]),
        _ => {}
    }

    if let Some(tls) = render_tls(&inbound.stream_settings) {
        result.insert("tls".into(), tls);
    }

    Value::Object(result)
}

/// Copy the named settings fields verbatim
fn copy_fields(result: &mut Map<String, Value>, settings: &Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = settings.get(*field) {
            result.insert((*field).to_string(), value.clone());
        }
    }
}

/// Map a `clients` list to sing-box `users`: `id` becomes `uuid`, plus
/// the per-protocol extra fields
fn map_clients(
    result: &mut Map<String, Value>,
    settings: &Map<String, Value>,
    extra: &[(&str, &str)],
) {
    let Some(clients) = settings.get("clients").and_then(Value::as_array) else {
        return;
    };
    let users: Vec<Value> = clients
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|client| {
            let mut user = Map::new();
            user.insert("uuid".into(), client.get("id")?.clone());
            for (from, to) in extra {
                if let Some(value) = client.get(*from) {
                    user.insert((*to).to_string(), value.clone());
                }
            }
            Some(Value::Object(user))
        })
        .collect();
    result.insert("users".into(), Value::Array(users));
}

fn map_trojan_clients(result: &mut Map<String, Value>, settings: &Map<String, Value>) {
    let Some(clients) = settings.get("clients").and_then(Value::as_array) else {
        return;
    };
    let users: Vec<Value> = clients
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|client| Some(json!({ "password": client.get("password")?.clone() })))
        .collect();
    result.insert("users".into(), Value::Array(users));
}

fn map_hysteria2(result: &mut Map<String, Value>, settings: &Map<String, Value>) {
    copy_fields(result, settings, &["up_mbps", "down_mbps", "users"]);
    // obfs is nested differently in sing-box
    if let Some(obfs) = settings.get("obfs").and_then(Value::as_object) {
        let mut restructured = Map::new();
        if let Some(kind) = obfs.get("type") {
            restructured.insert("type".into(), kind.clone());
        }
        if let Some(password) = obfs.get("password") {
            restructured.insert("password".into(), password.clone());
        }
        result.insert("obfs".into(), Value::Object(restructured));
    }
}

/// Emit a `tls` block when the stream settings carry a security marker
fn render_tls(stream_settings: &Map<String, Value>) -> Option<Value> {
    let security = stream_settings.get("security").and_then(Value::as_str)?;
    let nested = match security {
        "tls" => stream_settings.get("tlsSettings"),
        "reality" => stream_settings.get("realitySettings"),
        _ => return None,
    };
    let Some(nested) = nested.and_then(Value::as_object) else {
        return Some(json!({ "enabled": true }));
    };

    let mut tls = Map::new();
    tls.insert("enabled".into(), json!(true));
    if let Some(server_name) = nested.get("serverName") {
        tls.insert("server_name".into(), server_name.clone());
    }
    if let Some(cert) = nested
        .get("certificates")
        .and_then(Value::as_array)
        .and_then(|certs| certs.first())
        .and_then(Value::as_object)
    {
        if let Some(cert_file) = cert.get("certificateFile") {
            tls.insert("certificate_path".into(), cert_file.clone());
        }
        if let Some(key_file) = cert.get("keyFile") {
            tls.insert("key_path".into(), key_file.clone());
        }
    }
    Some(Value::Object(tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &[u8] = br#"{
        "log": {"level": "warn"},
        "experimental": {"clash_api": {"external_controller": "127.0.0.1:9090"}},
        "outbounds": [{"type": "direct", "tag": "direct"}]
    }"#;

    fn inbound(protocol: Protocol, settings: Value, stream_settings: Value) -> InboundConfig {
        serde_json::from_value(json!({
            "id": 1,
            "tag": "in1",
            "protocol": protocol,
            "listen": "::",
            "port": 8443,
            "settings": settings,
            "streamSettings": stream_settings,
            "enable": true
        }))
        .unwrap()
    }

    fn build_one(inbound: InboundConfig) -> Value {
        let builder = SingBoxConfigBuilder::new(TEMPLATE.to_vec());
        let bytes = builder.build(&[inbound]).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        doc["inbounds"][0].clone()
    }

    #[test]
    fn renames_port_and_maps_protocol_to_type() {
        let rendered = build_one(inbound(Protocol::Socks, json!({}), json!({})));
        assert_eq!(rendered["type"], "socks");
        assert_eq!(rendered["tag"], "in1");
        assert_eq!(rendered["listen"], "::");
        assert_eq!(rendered["listen_port"], 8443);
        assert!(rendered.get("port").is_none());
    }

    #[test]
    fn vless_clients_become_users_with_uuid_and_flow() {
        let rendered = build_one(inbound(
            Protocol::Vless,
            json!({"clients": [{"id": "abc", "flow": "xtls-rprx-vision"}]}),
            json!({}),
        ));
        assert_eq!(
            rendered["users"],
            json!([{"uuid": "abc", "flow": "xtls-rprx-vision"}])
        );
    }

    #[test]
    fn vmess_keeps_alter_id_and_drops_unmapped_fields() {
        let rendered = build_one(inbound(
            Protocol::Vmess,
            json!({"clients": [{"id": "u1", "alterId": 0, "email": "a@b.c"}], "detour": "x"}),
            json!({}),
        ));
        assert_eq!(rendered["users"], json!([{"uuid": "u1", "alterId": 0}]));
        assert!(rendered.get("detour").is_none());
    }

    #[test]
    fn trojan_clients_keep_only_the_password() {
        let rendered = build_one(inbound(
            Protocol::Trojan,
            json!({"clients": [{"password": "s3cret", "email": "a@b.c"}]}),
            json!({}),
        ));
        assert_eq!(rendered["users"], json!([{"password": "s3cret"}]));
    }

    #[test]
    fn hysteria2_obfs_is_restructured() {
        let rendered = build_one(inbound(
            Protocol::Hysteria2,
            json!({
                "up_mbps": 100,
                "down_mbps": 500,
                "obfs": {"type": "salamander", "password": "p", "extra": true},
                "users": [{"name": "u", "password": "p"}]
            }),
            json!({}),
        ));
        assert_eq!(rendered["up_mbps"], 100);
        assert_eq!(rendered["down_mbps"], 500);
        assert_eq!(rendered["obfs"], json!({"type": "salamander", "password": "p"}));
        assert_eq!(rendered["users"][0]["name"], "u");
    }

    #[test]
    fn tls_marker_emits_a_tls_block() {
        let rendered = build_one(inbound(
            Protocol::Trojan,
            json!({}),
            json!({
                "security": "tls",
                "tlsSettings": {
                    "serverName": "example.com",
                    "certificates": [{"certificateFile": "/c.pem", "keyFile": "/k.pem"}]
                }
            }),
        ));
        assert_eq!(
            rendered["tls"],
            json!({
                "enabled": true,
                "server_name": "example.com",
                "certificate_path": "/c.pem",
                "key_path": "/k.pem"
            })
        );
    }

    #[test]
    fn reality_marker_also_emits_tls() {
        let rendered = build_one(inbound(
            Protocol::Vless,
            json!({}),
            json!({"security": "reality", "realitySettings": {"serverName": "cdn.example"}}),
        ));
        assert_eq!(rendered["tls"]["enabled"], true);
        assert_eq!(rendered["tls"]["server_name"], "cdn.example");
    }

    #[test]
    fn disabled_inbounds_are_skipped() {
        let mut disabled = inbound(Protocol::Vmess, json!({}), json!({}));
        disabled.enable = false;
        let builder = SingBoxConfigBuilder::new(TEMPLATE.to_vec());
        let bytes = builder.build(&[disabled]).unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["inbounds"].as_array().unwrap().is_empty());
        // template content is preserved around the inbound list
        assert_eq!(
            doc["experimental"]["clash_api"]["external_controller"],
            "127.0.0.1:9090"
        );
    }

    #[test]
    fn malformed_template_is_a_hard_failure() {
        let builder = SingBoxConfigBuilder::new(b"[1, 2".to_vec());
        assert!(matches!(builder.build(&[]).unwrap_err(), Error::Config(_)));
    }

    #[test]
    fn template_round_trips_unchanged() {
        let builder = SingBoxConfigBuilder::new(TEMPLATE.to_vec());
        assert_eq!(builder.template(), TEMPLATE);
    }
}
