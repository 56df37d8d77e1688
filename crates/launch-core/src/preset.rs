//! Service presets: which model assets each deployment variant needs.
//!
//! Destination subpaths follow the ComfyUI model layout
//! (`models/diffusion_models`, `models/text_encoders`, `models/vae`,
//! `models/loras`, ...). The engine resolves checkpoints by these exact
//! paths at load time, so they are part of the service contract, not a
//! convention.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use launch_fetch::DownloadTask;

use crate::error::{LaunchError, Result};

/// Asset category, mapped to a fixed subdirectory of the model cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    DiffusionModel,
    TextEncoder,
    Vae,
    Lora,
    AudioEncoder,
}

impl AssetCategory {
    /// Subdirectory under the model cache root.
    pub fn subdir(&self) -> &'static str {
        match self {
            AssetCategory::DiffusionModel => "diffusion_models",
            AssetCategory::TextEncoder => "text_encoders",
            AssetCategory::Vae => "vae",
            AssetCategory::Lora => "loras",
            AssetCategory::AudioEncoder => "audio_encoders",
        }
    }
}

/// One model asset a service needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Remote URL (typically a HuggingFace `resolve/main` link).
    pub url: String,
    /// Cache category.
    pub category: AssetCategory,
    /// File name inside the category subdirectory.
    pub file_name: String,
    /// Name used in log lines.
    pub display_name: String,
}

impl AssetSpec {
    fn new(
        url: &str,
        category: AssetCategory,
        file_name: &str,
        display_name: &str,
    ) -> Self {
        Self {
            url: url.to_string(),
            category,
            file_name: file_name.to_string(),
            display_name: display_name.to_string(),
        }
    }

    /// Destination path under a given model cache root.
    pub fn dest_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(self.category.subdir()).join(&self.file_name)
    }
}

/// A deployable service variant and its model manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePreset {
    /// Preset name, also the singleton-lock key.
    pub name: String,
    /// One-line description for `presets` output.
    pub description: String,
    /// Assets to fetch before launch.
    pub assets: Vec<AssetSpec>,
}

impl ServicePreset {
    /// All built-in presets.
    pub fn builtin() -> Vec<ServicePreset> {
        vec![wan22_14b(), infinite_talk(), qwen_image_edit()]
    }

    /// Look up a built-in preset by name.
    pub fn find(name: &str) -> Result<ServicePreset> {
        Self::builtin()
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| LaunchError::UnknownPreset(name.to_string()))
    }

    /// Load a preset from a JSON manifest file.
    pub fn from_manifest(path: &Path) -> Result<ServicePreset> {
        let raw = std::fs::read_to_string(path).map_err(|e| LaunchError::InvalidManifest {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| LaunchError::InvalidManifest {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Download tasks for this preset against a model cache root.
    pub fn tasks(&self, models_dir: &Path) -> Vec<DownloadTask> {
        self.assets
            .iter()
            .map(|asset| {
                DownloadTask::new(
                    asset.url.clone(),
                    asset.dest_path(models_dir),
                    asset.display_name.clone(),
                )
            })
            .collect()
    }

    /// Expected on-disk paths, for cache verification.
    pub fn expected_paths(&self, models_dir: &Path) -> Vec<PathBuf> {
        self.assets
            .iter()
            .map(|asset| asset.dest_path(models_dir))
            .collect()
    }
}

fn wan22_14b() -> ServicePreset {
    ServicePreset {
        name: "wan22-14b".to_string(),
        description: "Wan 2.2 14B text-to-video with LoRA support".to_string(),
        assets: vec![
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.2_ComfyUI_Repackaged/resolve/main/split_files/diffusion_models/wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors",
                AssetCategory::DiffusionModel,
                "wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors",
                "Wan 2.2 high-noise expert",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.2_ComfyUI_Repackaged/resolve/main/split_files/diffusion_models/wan2.2_t2v_low_noise_14B_fp8_scaled.safetensors",
                AssetCategory::DiffusionModel,
                "wan2.2_t2v_low_noise_14B_fp8_scaled.safetensors",
                "Wan 2.2 low-noise expert",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.1_ComfyUI_repackaged/resolve/main/split_files/text_encoders/umt5_xxl_fp8_e4m3fn_scaled.safetensors",
                AssetCategory::TextEncoder,
                "umt5_xxl_fp8_e4m3fn_scaled.safetensors",
                "UMT5-XXL text encoder",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.1_ComfyUI_repackaged/resolve/main/split_files/vae/wan_2.1_vae.safetensors",
                AssetCategory::Vae,
                "wan_2.1_vae.safetensors",
                "Wan VAE",
            ),
            AssetSpec::new(
                "https://huggingface.co/Kijai/WanVideo_comfy/resolve/main/Lightx2v/lightx2v_T2V_14B_cfg_step_distill_v2_lora_rank64_bf16.safetensors",
                AssetCategory::Lora,
                "lightx2v_t2v_14b_step_distill_rank64.safetensors",
                "LightX2V step-distill LoRA",
            ),
        ],
    }
}

fn infinite_talk() -> ServicePreset {
    ServicePreset {
        name: "infinite-talk".to_string(),
        description: "InfiniteTalk talking-head synthesis on Wan 2.1".to_string(),
        assets: vec![
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.1_ComfyUI_repackaged/resolve/main/split_files/diffusion_models/wan2.1_i2v_480p_14B_fp8_e4m3fn.safetensors",
                AssetCategory::DiffusionModel,
                "wan2.1_i2v_480p_14B_fp8_e4m3fn.safetensors",
                "Wan 2.1 image-to-video",
            ),
            AssetSpec::new(
                "https://huggingface.co/Kijai/WanVideo_comfy/resolve/main/InfiniteTalk/Wan2_1-InfiniteTalk_Single_fp8_e4m3fn_scaled_KJ.safetensors",
                AssetCategory::DiffusionModel,
                "wan2.1_infinitetalk_single_fp8.safetensors",
                "InfiniteTalk motion module",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.1_ComfyUI_repackaged/resolve/main/split_files/text_encoders/umt5_xxl_fp8_e4m3fn_scaled.safetensors",
                AssetCategory::TextEncoder,
                "umt5_xxl_fp8_e4m3fn_scaled.safetensors",
                "UMT5-XXL text encoder",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Wan_2.1_ComfyUI_repackaged/resolve/main/split_files/vae/wan_2.1_vae.safetensors",
                AssetCategory::Vae,
                "wan_2.1_vae.safetensors",
                "Wan VAE",
            ),
            AssetSpec::new(
                "https://huggingface.co/Kijai/wav2vec2_safetensors/resolve/main/wav2vec2-chinese-base_fp16.safetensors",
                AssetCategory::AudioEncoder,
                "wav2vec2-chinese-base_fp16.safetensors",
                "wav2vec2 audio encoder",
            ),
        ],
    }
}

fn qwen_image_edit() -> ServicePreset {
    ServicePreset {
        name: "qwen-image-edit".to_string(),
        description: "Qwen image editing with Lightning LoRA".to_string(),
        assets: vec![
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Qwen-Image-Edit_ComfyUI/resolve/main/split_files/diffusion_models/qwen_image_edit_fp8_e4m3fn.safetensors",
                AssetCategory::DiffusionModel,
                "qwen_image_edit_fp8_e4m3fn.safetensors",
                "Qwen Image Edit",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Qwen-Image_ComfyUI/resolve/main/split_files/text_encoders/qwen_2.5_vl_7b_fp8_scaled.safetensors",
                AssetCategory::TextEncoder,
                "qwen_2.5_vl_7b_fp8_scaled.safetensors",
                "Qwen 2.5 VL text encoder",
            ),
            AssetSpec::new(
                "https://huggingface.co/Comfy-Org/Qwen-Image_ComfyUI/resolve/main/split_files/vae/qwen_image_vae.safetensors",
                AssetCategory::Vae,
                "qwen_image_vae.safetensors",
                "Qwen Image VAE",
            ),
            AssetSpec::new(
                "https://huggingface.co/lightx2v/Qwen-Image-Lightning/resolve/main/Qwen-Image-Lightning-8steps-V1.0.safetensors",
                AssetCategory::Lora,
                "qwen-image-lightning-8steps-v1.0.safetensors",
                "Qwen Lightning 8-step LoRA",
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_resolve_by_name() {
        for name in ["wan22-14b", "infinite-talk", "qwen-image-edit"] {
            let preset = ServicePreset::find(name).unwrap();
            assert_eq!(preset.name, name);
            assert!(!preset.assets.is_empty());
        }
        assert!(matches!(
            ServicePreset::find("sdxl-turbo"),
            Err(LaunchError::UnknownPreset(_))
        ));
    }

    #[test]
    fn tasks_land_in_the_engine_model_layout() {
        let preset = ServicePreset::find("wan22-14b").unwrap();
        let tasks = preset.tasks(Path::new("/workspace/ComfyUI/models"));

        assert_eq!(tasks.len(), preset.assets.len());
        assert_eq!(
            tasks[0].dest_path,
            PathBuf::from(
                "/workspace/ComfyUI/models/diffusion_models/wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors"
            )
        );
        assert!(tasks
            .iter()
            .any(|t| t.dest_path.starts_with("/workspace/ComfyUI/models/vae")));
        assert!(tasks
            .iter()
            .any(|t| t.dest_path.starts_with("/workspace/ComfyUI/models/loras")));
    }

    #[test]
    fn manifest_roundtrip_preserves_the_asset_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        let preset = ServicePreset::find("qwen-image-edit").unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&preset).unwrap()).unwrap();

        let loaded = ServicePreset::from_manifest(&path).unwrap();
        assert_eq!(loaded.name, preset.name);
        assert_eq!(loaded.assets.len(), preset.assets.len());
        assert_eq!(loaded.assets[0].category, AssetCategory::DiffusionModel);
    }

    #[test]
    fn malformed_manifest_is_rejected_with_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = ServicePreset::from_manifest(&path).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidManifest { .. }));
    }

    #[test]
    fn expected_paths_match_task_destinations() {
        let preset = ServicePreset::find("infinite-talk").unwrap();
        let models = Path::new("/srv/models");
        let tasks = preset.tasks(models);
        let expected = preset.expected_paths(models);

        let task_paths: Vec<_> = tasks.into_iter().map(|t| t.dest_path).collect();
        assert_eq!(task_paths, expected);
    }
}
