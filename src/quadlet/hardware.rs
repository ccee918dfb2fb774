//! Hardware acceleration backends for transcoding and ML inference.
//!
//! Each backend is a plain enum variant; the device mounts, extra volumes,
//! environment variables, security options, supplementary groups, and image
//! suffix it contributes are a pure function of the variant (§4.3.3, tested
//! property 9), computed by exhaustive `match` rather than a lookup table, so
//! adding a backend that forgets one of these dimensions is a compile error.

use indexmap::IndexMap;

/// Transcoding acceleration backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscodingBackend {
    #[default]
    Disabled,
    Nvenc,
    Qsv,
    Vaapi,
    VaapiWsl,
    Rkmpp,
}

/// ML (facial recognition / smart search) acceleration backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MlBackend {
    #[default]
    Disabled,
    Cuda,
    Openvino,
    OpenvinoWsl,
    Armnn,
    Rknn,
    Rocm,
}

/// The devices, volumes, environment, security options, groups, and image
/// suffix a hardware backend contributes to a container definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareEffect {
    /// `host:container` device mount entries.
    pub devices: Vec<String>,
    /// Extra bind mounts, as `(host_path, container_path)`.
    pub volumes: Vec<(String, String)>,
    pub environment: IndexMap<String, String>,
    /// Untranslated `--security-opt` values.
    pub security_opts: Vec<String>,
    pub groups: Vec<String>,
    /// Suffix appended to the backend's image name, e.g. `-cuda`.
    pub image_suffix: Option<&'static str>,
}

const DRI: &str = "/dev/dri:/dev/dri";
const RGA: &str = "/dev/rga:/dev/rga";
const MPP_SERVICE: &str = "/dev/mpp_service:/dev/mpp_service";
const WSL_LIB_DIR: &str = "/usr/lib/wsl/lib";
const UNCONFINED: [&str; 2] = ["systempaths=unconfined", "apparmor=unconfined"];

impl TranscodingBackend {
    /// The devices/volumes/env/security/groups this backend contributes.
    /// NVIDIA NVENC contributes nothing: the GPU reservation is performed by
    /// the engine itself, not by a device mount.
    #[must_use]
    pub fn effect(self) -> HardwareEffect {
        match self {
            Self::Disabled | Self::Nvenc => HardwareEffect::default(),
            Self::Qsv | Self::Vaapi => HardwareEffect {
                devices: vec![DRI.to_owned()],
                ..HardwareEffect::default()
            },
            Self::VaapiWsl => HardwareEffect {
                devices: vec![DRI.to_owned()],
                volumes: vec![(WSL_LIB_DIR.to_owned(), WSL_LIB_DIR.to_owned())],
                environment: [("LIBVA_DRIVER_NAME".to_owned(), "d3d12".to_owned())].into(),
                ..HardwareEffect::default()
            },
            Self::Rkmpp => HardwareEffect {
                devices: vec![DRI.to_owned(), RGA.to_owned(), MPP_SERVICE.to_owned()],
                security_opts: UNCONFINED.iter().map(|&s| s.to_owned()).collect(),
                ..HardwareEffect::default()
            },
        }
    }
}

impl MlBackend {
    /// ROCm uses the `-cuda` ML image per §4.3.3; every other backend maps
    /// to an image suffix matching its own name.
    #[must_use]
    pub fn effect(self) -> HardwareEffect {
        match self {
            Self::Disabled => HardwareEffect::default(),
            Self::Cuda => HardwareEffect {
                image_suffix: Some("-cuda"),
                ..HardwareEffect::default()
            },
            Self::Openvino => HardwareEffect {
                devices: vec![DRI.to_owned()],
                image_suffix: Some("-openvino"),
                ..HardwareEffect::default()
            },
            Self::OpenvinoWsl => HardwareEffect {
                devices: vec![DRI.to_owned()],
                volumes: vec![(WSL_LIB_DIR.to_owned(), WSL_LIB_DIR.to_owned())],
                environment: [("LIBVA_DRIVER_NAME".to_owned(), "d3d12".to_owned())].into(),
                image_suffix: Some("-openvino"),
                ..HardwareEffect::default()
            },
            Self::Armnn => HardwareEffect {
                devices: vec!["/dev/mali0:/dev/mali0".to_owned()],
                image_suffix: Some("-armnn"),
                ..HardwareEffect::default()
            },
            Self::Rknn => HardwareEffect {
                devices: vec![DRI.to_owned(), RGA.to_owned(), MPP_SERVICE.to_owned()],
                image_suffix: Some("-rknn"),
                ..HardwareEffect::default()
            },
            Self::Rocm => HardwareEffect {
                devices: vec!["/dev/kfd:/dev/kfd".to_owned(), DRI.to_owned()],
                groups: vec!["video".to_owned()],
                image_suffix: Some("-cuda"),
                ..HardwareEffect::default()
            },
        }
    }
}

/// Append a hardware image suffix before the tag/digest portion of an image
/// reference's name, e.g. `immich-machine-learning` + `-cuda` + `:v1` ->
/// `immich-machine-learning-cuda:v1`.
#[must_use]
pub fn apply_image_suffix(image: &str, suffix: Option<&str>) -> String {
    let Some(suffix) = suffix else {
        return image.to_owned();
    };

    // Split on the first `:` or `@` that marks the start of a tag/digest,
    // restricted to the portion after the last `/` so registry ports are
    // never mistaken for a tag separator, mirroring the `ContainerImage` parser.
    let slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[slash..].find([':', '@']) {
        Some(i) => {
            let split_at = slash + i;
            format!("{}{suffix}{}", &image[..split_at], &image[split_at..])
        }
        None => format!("{image}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rkmpp_transcoding_matches_scenario_s3() {
        let effect = TranscodingBackend::Rkmpp.effect();
        assert_eq!(
            effect.devices,
            vec![
                "/dev/dri:/dev/dri".to_owned(),
                "/dev/rga:/dev/rga".to_owned(),
                "/dev/mpp_service:/dev/mpp_service".to_owned(),
            ]
        );
        assert_eq!(
            effect.security_opts,
            vec!["systempaths=unconfined".to_owned(), "apparmor=unconfined".to_owned()]
        );
    }

    #[test]
    fn nvenc_contributes_no_devices() {
        assert_eq!(TranscodingBackend::Nvenc.effect(), HardwareEffect::default());
    }

    #[test]
    fn disabled_backends_contribute_nothing() {
        assert_eq!(TranscodingBackend::Disabled.effect(), HardwareEffect::default());
        assert_eq!(MlBackend::Disabled.effect(), HardwareEffect::default());
    }

    #[test]
    fn rocm_uses_cuda_image_suffix_and_video_group() {
        let effect = MlBackend::Rocm.effect();
        assert_eq!(effect.image_suffix, Some("-cuda"));
        assert_eq!(effect.groups, vec!["video".to_owned()]);
    }

    #[test]
    fn cuda_suffix_applies_before_tag() {
        let image = apply_image_suffix(
            "ghcr.io/immich-app/immich-machine-learning:v1.100.0",
            Some("-cuda"),
        );
        assert_eq!(image, "ghcr.io/immich-app/immich-machine-learning-cuda:v1.100.0");
    }

    #[test]
    fn suffix_applies_before_digest_with_registry_port() {
        let digest = "a".repeat(64);
        let image = apply_image_suffix(
            &format!("localhost:5000/immich-ml@sha256:{digest}"),
            Some("-openvino"),
        );
        assert_eq!(
            image,
            format!("localhost:5000/immich-ml-openvino@sha256:{digest}")
        );
    }

    #[test]
    fn no_suffix_leaves_image_untouched() {
        assert_eq!(apply_image_suffix("redis:7", None), "redis:7");
    }
}
