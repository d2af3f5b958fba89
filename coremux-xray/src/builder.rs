//! Xray config builder
//!
//! The generic inbound shape was modelled on Xray's own schema, so the
//! translation is a near-verbatim copy: inbound fields land in the
//! template's `inbounds` array unchanged.

use serde_json::{json, Map, Value};

use coremux_core::{ConfigBuilder, CoreKind, Error, InboundConfig, Result};

pub struct XrayConfigBuilder {
    template: Vec<u8>,
}

impl XrayConfigBuilder {
    pub fn new(template: Vec<u8>) -> Self {
        Self { template }
    }
}

impl ConfigBuilder for XrayConfigBuilder {
    fn build(&self, inbounds: &[InboundConfig]) -> Result<Vec<u8>> {
        let mut doc: Value = serde_json::from_slice(&self.template)
            .map_err(|e| Error::Config(format!("xray template is not valid JSON: {}", e)))?;
        let root = doc
            .as_object_mut()
            .ok_or_else(|| Error::Config("xray template root must be an object".into()))?;

        let rendered: Vec<Value> = inbounds
            .iter()
            .filter(|inbound| inbound.enable)
            .filter(|inbound| {
                let supported = inbound.protocol.supported_by(CoreKind::Xray);
                if !supported {
                    log::debug!(
                        "skipping inbound {}: protocol {} not supported by xray",
                        inbound.tag,
                        inbound.protocol
                    );
                }
                supported
            })
            .map(render_inbound)
            .collect();

        // the template's inbound list is replaced, not merged
        root.insert("inbounds".to_string(), Value::Array(rendered));

        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    fn template(&self) -> &[u8] {
        &self.template
    }
}

fn render_inbound(inbound: &InboundConfig) -> Value {
    let mut object = Map::new();
    object.insert("tag".into(), json!(inbound.tag));
    object.insert("protocol".into(), json!(inbound.protocol));
    object.insert("listen".into(), json!(inbound.listen));
    object.insert("port".into(), json!(inbound.port));
    object.insert("settings".into(), Value::Object(inbound.settings.clone()));
    if !inbound.stream_settings.is_empty() {
        object.insert(
            "streamSettings".into(),
            Value::Object(inbound.stream_settings.clone()),
        );
    }
    if let Some(sniffing) = &inbound.sniffing {
        object.insert(
            "sniffing".into(),
            json!({
                "enabled": sniffing.enabled,
                "destOverride": sniffing.dest_override,
            }),
        );
    }
    Value::Object(object)
}
