use std::collections::BTreeMap;

use crate::catalog::{ImageSize, IMAGE_ENDPOINT_FLUX_LORA};

use super::types::{ImageRequest, Lora};

pub const DEFAULT_LORA_SCALE: f32 = 1.0;

/// Builds an image request from a user prompt.
///
/// Substitutions from `replace` are applied first. Every LoRA trigger word
/// still present in the rewritten prompt attaches its weights and switches
/// the request to the LoRA endpoint.
pub fn build_request(
    prompt: &str,
    size: ImageSize,
    default_endpoint: &str,
    replace: &BTreeMap<String, String>,
    loras: &BTreeMap<String, String>,
) -> ImageRequest {
    let mut prompt = prompt.to_string();
    for (from, to) in replace {
        if !from.is_empty() {
            prompt = prompt.replace(from.as_str(), to);
        }
    }

    let loras: Vec<Lora> = loras
        .iter()
        .filter(|(trigger, _)| !trigger.is_empty() && prompt.contains(trigger.as_str()))
        .map(|(_, path)| Lora {
            path: path.clone(),
            scale: DEFAULT_LORA_SCALE,
        })
        .collect();

    let endpoint = if loras.is_empty() {
        default_endpoint
    } else {
        IMAGE_ENDPOINT_FLUX_LORA
    };

    ImageRequest {
        endpoint: endpoint.to_string(),
        prompt,
        size,
        loras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, IMAGE_ENDPOINT_FLUX_PRO};

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_prompt_uses_default_endpoint() {
        let req = build_request(
            "a red fox",
            Catalog::builtin().default_size(),
            IMAGE_ENDPOINT_FLUX_PRO,
            &BTreeMap::new(),
            &map(&[("TOK", "https://example.com/tok.safetensors")]),
        );
        assert_eq!(req.endpoint, IMAGE_ENDPOINT_FLUX_PRO);
        assert_eq!(req.prompt, "a red fox");
        assert!(req.loras.is_empty());
    }

    #[test]
    fn replacements_run_before_trigger_detection() {
        let req = build_request(
            "portrait of alice",
            Catalog::builtin().default_size(),
            IMAGE_ENDPOINT_FLUX_PRO,
            &map(&[("alice", "ALC woman")]),
            &map(&[("ALC", "https://example.com/alc.safetensors")]),
        );
        assert_eq!(req.prompt, "portrait of ALC woman");
        assert_eq!(req.endpoint, IMAGE_ENDPOINT_FLUX_LORA);
        assert_eq!(
            req.loras,
            vec![Lora {
                path: "https://example.com/alc.safetensors".to_string(),
                scale: 1.0,
            }]
        );
    }
}
