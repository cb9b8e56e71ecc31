use crate::error::Error;
use serde_json::Value;
use tracing::warn;

/// Wire status of one generation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Pending,
    Successful,
    Failed,
    Unknown,
}

impl GenerationStatus {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "MEDIA_GENERATION_STATUS_PENDING" => GenerationStatus::Pending,
            "MEDIA_GENERATION_STATUS_SUCCESSFUL" => GenerationStatus::Successful,
            "MEDIA_GENERATION_STATUS_FAILED" => GenerationStatus::Failed,
            _ => GenerationStatus::Unknown,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "MEDIA_GENERATION_STATUS_PENDING",
            GenerationStatus::Successful => "MEDIA_GENERATION_STATUS_SUCCESSFUL",
            GenerationStatus::Failed => "MEDIA_GENERATION_STATUS_FAILED",
            GenerationStatus::Unknown => "MEDIA_GENERATION_STATUS_UNSPECIFIED",
        }
    }
}

/// Seed exactly as the remote sent it. The wire sometimes carries numbers,
/// sometimes strings; coercion to a usable positive integer is the caller's
/// decision, not the normalizer's.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeed(pub Value);

impl RawSeed {
    pub fn as_positive(&self) -> Option<i64> {
        let n = match &self.0 {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        n.filter(|v| *v > 0)
    }
}

/// One generation response flattened into a fixed record. Every field except
/// `raw` is optional because the remote's payload shape varies with the
/// success/pending/error state of the operation.
#[derive(Debug, Clone)]
pub struct NormalizedGeneration {
    pub media_generation_id: Option<String>,
    pub seed: Option<RawSeed>,
    pub fife_url: Option<String>,
    pub status: Option<GenerationStatus>,
    pub scene_id: Option<String>,
    pub operation_name: Option<String>,
    pub remaining_credits: Option<i64>,
    pub raw: Value,
}

impl NormalizedGeneration {
    /// True when the payload yielded nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.media_generation_id.is_none()
            && self.operation_name.is_none()
            && self.fife_url.is_none()
            && self.seed.is_none()
            && self.status.is_none()
    }

    /// The identifier an extend request should reference: the operation name
    /// when present, otherwise the media generation id.
    pub fn chain_handle(&self) -> Option<&str> {
        self.operation_name
            .as_deref()
            .or(self.media_generation_id.as_deref())
            .filter(|h| !h.trim().is_empty())
    }

    /// A record missing its generation id or seed can never anchor the next
    /// scene; reject it before anything is submitted against it.
    pub fn require_chain_fields(&self, scene: usize) -> Result<(), Error> {
        let mut missing = Vec::new();
        if self.media_generation_id.is_none() {
            missing.push("mediaGenerationId");
        }
        if self.seed.is_none() {
            missing.push("seed");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::chain(
                scene,
                format!("response missing required fields: {}", missing.join(", ")),
            ))
        }
    }
}

fn str_at<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Flatten a raw submit/extend/status response. Field locations are probed in
/// priority order: the flat top-level triple first, then
/// `operations[0]` / `operations[0].operation` / `...operation.metadata.video`.
pub fn normalize(raw: &Value) -> NormalizedGeneration {
    let mut out = NormalizedGeneration {
        media_generation_id: None,
        seed: None,
        fife_url: None,
        status: None,
        scene_id: None,
        operation_name: None,
        remaining_credits: None,
        raw: raw.clone(),
    };

    if !raw.is_object() {
        return out;
    }

    // Flat shape: only trusted when all three keys travel together.
    if raw.get("mediaGenerationId").is_some()
        && raw.get("seed").is_some()
        && raw.get("fifeUrl").is_some()
    {
        out.media_generation_id = str_at(raw, "mediaGenerationId").map(str::to_string);
        out.seed = raw.get("seed").map(|v| RawSeed(v.clone()));
        out.fife_url = str_at(raw, "fifeUrl").map(str::to_string);
    }

    let op = raw
        .get("operations")
        .and_then(Value::as_array)
        .and_then(|ops| ops.first());

    if let Some(op) = op {
        let op_body = op.get("operation");
        let video_meta = op_body
            .and_then(|b| b.get("metadata"))
            .and_then(|m| m.get("video"));

        if out.media_generation_id.is_none() {
            out.media_generation_id = str_at(op, "mediaGenerationId")
                .or_else(|| video_meta.and_then(|v| str_at(v, "mediaGenerationId")))
                .map(str::to_string);
        }
        if out.seed.is_none() {
            out.seed = video_meta
                .and_then(|v| v.get("seed"))
                .map(|v| RawSeed(v.clone()));
        }
        if out.fife_url.is_none() {
            out.fife_url = video_meta
                .and_then(|v| str_at(v, "fifeUrl"))
                .map(str::to_string);
        }

        out.status = str_at(op, "status").map(GenerationStatus::from_wire);
        out.scene_id = op.get("sceneId").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        out.operation_name = op_body.and_then(|b| str_at(b, "name")).map(str::to_string);
    }

    out.remaining_credits = raw.get("remainingCredits").and_then(Value::as_i64);
    out
}

/// Pull media generation ids out of a batch image response. The remote has
/// shipped at least four shapes for this payload; they are probed in priority
/// order and the first shape that yields ids wins.
pub fn media_ids_from_batch(data: &Value) -> Vec<String> {
    let mut ids = Vec::new();

    if let Some(media) = data.get("media").and_then(Value::as_array) {
        for entry in media {
            let id = str_at(entry, "mediaGenerationId")
                .or_else(|| {
                    entry
                        .get("video")
                        .and_then(|v| {
                            v.get("generatedVideo")
                                .and_then(|g| str_at(g, "mediaGenerationId"))
                                .or_else(|| str_at(v, "mediaGenerationId"))
                        })
                })
                .or_else(|| {
                    entry.get("image").and_then(|i| {
                        i.get("generatedImage")
                            .and_then(|g| str_at(g, "mediaGenerationId"))
                            .or_else(|| str_at(i, "mediaGenerationId"))
                    })
                });
            if let Some(id) = id {
                ids.push(id.to_string());
            }
        }
        if !ids.is_empty() {
            return ids;
        }
    }

    if let Some(responses) = data.get("responses").and_then(Value::as_array) {
        for entry in responses {
            let id = entry
                .get("videos")
                .and_then(Value::as_array)
                .and_then(|v| v.first())
                .and_then(|v| str_at(v, "mediaGenerationId"))
                .or_else(|| {
                    entry
                        .get("images")
                        .and_then(Value::as_array)
                        .and_then(|v| v.first())
                        .and_then(|v| str_at(v, "mediaGenerationId"))
                });
            if let Some(id) = id {
                ids.push(id.to_string());
            }
        }
        if !ids.is_empty() {
            return ids;
        }
    }

    if let Some(workflows) = data.get("workflows").and_then(Value::as_array) {
        for wf in workflows {
            if let Some(id) = wf
                .get("metadata")
                .and_then(|m| str_at(m, "primaryMediaId"))
            {
                ids.push(id.to_string());
            }
        }
        if !ids.is_empty() {
            return ids;
        }
    }

    if let Some(ops) = data.get("operations").and_then(Value::as_array) {
        for op in ops {
            if let Some(id) = op
                .get("operation")
                .and_then(|o| str_at(o, "mediaGenerationId"))
            {
                ids.push(id.to_string());
            }
        }
    }

    if ids.is_empty() {
        let keys: Vec<&str> = data
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        warn!(?keys, "no media generation ids found in batch response");
    }

    ids
}

/// Extract `media[].name` (falling back to `workflows[].name`) in response
/// order; names are the reference handles image inputs are addressed by.
pub fn media_names_from_batch(data: &Value) -> Vec<String> {
    let mut names: Vec<String> = data
        .get("media")
        .and_then(Value::as_array)
        .map(|media| {
            media
                .iter()
                .filter_map(|m| str_at(m, "name"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if names.is_empty() {
        if let Some(workflows) = data.get("workflows").and_then(Value::as_array) {
            names = workflows
                .iter()
                .filter_map(|w| str_at(w, "name"))
                .map(str::to_string)
                .collect();
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn surfaces_nested_video_metadata_unchanged() {
        let raw = json!({
            "operations": [{
                "operation": {
                    "name": "op-123",
                    "metadata": {"video": {
                        "mediaGenerationId": "mg-1",
                        "seed": 777,
                        "fifeUrl": "https://cdn.example/clip.mp4"
                    }}
                },
                "status": "MEDIA_GENERATION_STATUS_SUCCESSFUL",
                "sceneId": "3"
            }],
            "remainingCredits": 44980
        });

        let n = normalize(&raw);
        assert_eq!(n.media_generation_id.as_deref(), Some("mg-1"));
        assert_eq!(n.seed.as_ref().unwrap().as_positive(), Some(777));
        assert_eq!(n.fife_url.as_deref(), Some("https://cdn.example/clip.mp4"));
        assert_eq!(n.status, Some(GenerationStatus::Successful));
        assert_eq!(n.scene_id.as_deref(), Some("3"));
        assert_eq!(n.operation_name.as_deref(), Some("op-123"));
        assert_eq!(n.remaining_credits, Some(44980));
    }

    #[test]
    fn flat_shape_requires_all_three_keys() {
        let partial = json!({"mediaGenerationId": "mg-2", "seed": 5});
        let n = normalize(&partial);
        assert!(n.media_generation_id.is_none());
        assert!(n.seed.is_none());

        let full = json!({"mediaGenerationId": "mg-2", "seed": 5, "fifeUrl": "u"});
        let n = normalize(&full);
        assert_eq!(n.media_generation_id.as_deref(), Some("mg-2"));
        assert_eq!(n.seed.as_ref().unwrap().as_positive(), Some(5));
    }

    #[test]
    fn missing_required_fields_cannot_chain() {
        let raw = json!({
            "operations": [{
                "operation": {"name": "op-9"},
                "status": "MEDIA_GENERATION_STATUS_PENDING"
            }]
        });
        let n = normalize(&raw);
        let err = n.require_chain_fields(2).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("scene 2"));
        assert!(msg.contains("mediaGenerationId"));
        assert!(msg.contains("seed"));
    }

    #[test]
    fn chain_handle_prefers_operation_name() {
        let raw = json!({
            "operations": [{
                "mediaGenerationId": "mg-7",
                "operation": {
                    "name": "op-7",
                    "metadata": {"video": {"seed": 1}}
                }
            }]
        });
        let n = normalize(&raw);
        assert_eq!(n.chain_handle(), Some("op-7"));

        let raw = json!({
            "operations": [{
                "mediaGenerationId": "mg-8",
                "operation": {"metadata": {"video": {"seed": 1}}}
            }]
        });
        let n = normalize(&raw);
        assert_eq!(n.chain_handle(), Some("mg-8"));
    }

    #[test]
    fn seed_coercion_rejects_non_positive_and_garbage() {
        assert_eq!(RawSeed(json!(42)).as_positive(), Some(42));
        assert_eq!(RawSeed(json!("42")).as_positive(), Some(42));
        assert_eq!(RawSeed(json!(0)).as_positive(), None);
        assert_eq!(RawSeed(json!(-3)).as_positive(), None);
        assert_eq!(RawSeed(json!("banana")).as_positive(), None);
        assert_eq!(RawSeed(json!(null)).as_positive(), None);
    }

    #[test]
    fn non_object_payload_normalizes_to_empty() {
        let n = normalize(&json!("oops"));
        assert!(n.is_empty());
    }

    #[test]
    fn batch_ids_probe_shapes_in_priority_order() {
        let media_shape = json!({"media": [
            {"video": {"generatedVideo": {"mediaGenerationId": "a"}}},
            {"image": {"generatedImage": {"mediaGenerationId": "b"}}},
            {"mediaGenerationId": "c"}
        ]});
        assert_eq!(media_ids_from_batch(&media_shape), vec!["a", "b", "c"]);

        let legacy = json!({"responses": [
            {"videos": [{"mediaGenerationId": "v1"}]},
            {"images": [{"mediaGenerationId": "i1"}]}
        ]});
        assert_eq!(media_ids_from_batch(&legacy), vec!["v1", "i1"]);

        let workflows = json!({"workflows": [{"metadata": {"primaryMediaId": "w1"}}]});
        assert_eq!(media_ids_from_batch(&workflows), vec!["w1"]);

        let operations = json!({"operations": [{"operation": {"mediaGenerationId": "o1"}}]});
        assert_eq!(media_ids_from_batch(&operations), vec!["o1"]);
    }

    #[test]
    fn batch_names_fall_back_to_workflows() {
        let with_media = json!({"media": [{"name": "n1"}, {"name": "n2"}]});
        assert_eq!(media_names_from_batch(&with_media), vec!["n1", "n2"]);

        let with_workflows = json!({"workflows": [{"name": "wf1"}]});
        assert_eq!(media_names_from_batch(&with_workflows), vec!["wf1"]);
    }
}
