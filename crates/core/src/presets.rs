// Preset Catalog
//
// Static mapping from preset id to the instruction text sent to the
// restoration provider. Pure lookup, no state.

use serde::Serialize;

/// Preset used when a submission names none
pub const DEFAULT_PRESET: &str = "automagic";

/// Named restoration instruction profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub instruction: &'static str,
}

const PRESETS: &[Preset] = &[
    Preset {
        id: "automagic",
        name: "Automagic",
        description: "Intelligent automatic restoration",
        instruction: "Intelligently restore this photo: remove scratches, dust, and damage; reduce noise while preserving detail; correct color cast and fading; enhance clarity naturally; maintain authentic vintage character",
    },
    Preset {
        id: "colorize",
        name: "Colorize",
        description: "Add natural colors to B&W photos",
        instruction: "Transform this black and white photo to color with historically accurate tones; use natural skin tones; avoid oversaturation; preserve original texture and grain; maintain period-appropriate color palette",
    },
    Preset {
        id: "denoise",
        name: "Denoise",
        description: "Remove grain and digital noise",
        instruction: "Remove noise and grain from this photo while preserving important details; eliminate digital artifacts; maintain sharp edges; preserve texture in faces and important areas",
    },
    Preset {
        id: "fix-tears",
        name: "Fix Tears",
        description: "Repair torn and damaged areas",
        instruction: "Repair torn edges, rips, and missing sections in this photo; reconstruct damaged areas naturally; blend repairs seamlessly; maintain photo's original character",
    },
    Preset {
        id: "remove-stains",
        name: "Remove Stains",
        description: "Clean water damage and discoloration",
        instruction: "Remove water damage, coffee stains, foxing, and discoloration from this photo; restore original colors; eliminate yellowing; preserve important details",
    },
    Preset {
        id: "enhance-faces",
        name: "Enhance Faces",
        description: "Sharpen facial features naturally",
        instruction: "Sharpen and enhance facial features in this photo while keeping natural appearance; improve eye clarity; enhance facial details; avoid artificial smoothing",
    },
    Preset {
        id: "film-grain",
        name: "Film Grain",
        description: "Preserve authentic vintage texture",
        instruction: "Restore this photo while preserving authentic film grain and vintage texture; maintain period character; enhance without modernizing",
    },
    Preset {
        id: "document",
        name: "Document Mode",
        description: "Optimize for text and documents",
        instruction: "Optimize this document, certificate, or newspaper for readability; enhance text clarity; remove background stains; improve contrast; straighten if needed",
    },
];

/// Lookup over the built-in presets
#[derive(Debug, Clone, Copy, Default)]
pub struct PresetCatalog;

impl PresetCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn get(&self, id: &str) -> Option<&'static Preset> {
        PRESETS.iter().find(|p| p.id == id)
    }

    pub fn instruction(&self, id: &str) -> Option<&'static str> {
        self.get(id).map(|p| p.instruction)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|p| p.id)
    }

    pub fn all(&self) -> &'static [Preset] {
        PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_eight_presets() {
        let catalog = PresetCatalog::new();
        let ids: Vec<_> = catalog.ids().collect();
        assert_eq!(
            ids,
            vec![
                "automagic",
                "colorize",
                "denoise",
                "fix-tears",
                "remove-stains",
                "enhance-faces",
                "film-grain",
                "document"
            ]
        );
    }

    #[test]
    fn test_lookup() {
        let catalog = PresetCatalog::new();
        assert!(catalog
            .instruction("denoise")
            .unwrap()
            .starts_with("Remove noise and grain"));
        assert_eq!(catalog.get("document").unwrap().name, "Document Mode");
        assert!(catalog.get("sharpen").is_none());
        assert!(!catalog.contains("Denoise"));
    }

    #[test]
    fn test_default_preset_exists() {
        assert!(PresetCatalog::new().contains(DEFAULT_PRESET));
    }
}
