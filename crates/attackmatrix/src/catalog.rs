//! Matrix catalog
//!
//! Static registry of the ATT&CK matrices the engine knows how to build,
//! with their upstream STIX bundle locations.

/// One known matrix and where its bundle lives.
#[derive(Debug, Clone, Copy)]
pub struct MatrixSource {
    /// Short matrix name; also the graph and cache key.
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Local file name for the downloaded bundle.
    pub file: &'static str,
    pub url: &'static str,
}

/// Every matrix the engine can generate.
pub const MATRICES: &[MatrixSource] = &[
    MatrixSource {
        name: "Enterprise",
        title: "MITRE ATT&CK® Matrix for Enterprise",
        description: "The Matrix contains information for the following platforms: \
                      Windows, macOS, Linux, PRE, Azure AD, Office 365, Google Workspace, \
                      SaaS, IaaS, Network, Containers.",
        file: "enterprise-attack.json",
        url: "https://raw.githubusercontent.com/mitre/cti/master/enterprise-attack/enterprise-attack.json",
    },
    MatrixSource {
        name: "Mobile",
        title: "MITRE ATT&CK® Matrix for Mobile",
        description: "MITRE ATT&CK® Matrix for Android and iOS.",
        file: "mobile-attack.json",
        url: "https://raw.githubusercontent.com/mitre/cti/master/mobile-attack/mobile-attack.json",
    },
    MatrixSource {
        name: "ICS",
        title: "MITRE ATT&CK® Matrix for ICS",
        description: "ATT&CK for ICS is a knowledge base useful for describing the actions \
                      an adversary may take while operating within an ICS network.",
        file: "ics-attack.json",
        url: "https://raw.githubusercontent.com/mitre/cti/master/ics-attack/ics-attack.json",
    },
    MatrixSource {
        name: "PRE",
        title: "MITRE ATT&CK® Matrix for PRE",
        description: "MITRE ATT&CK® Matrix for Enterprise, covering PREparatory techniques.",
        file: "pre-attack.json",
        url: "https://raw.githubusercontent.com/mitre/cti/master/pre-attack/pre-attack.json",
    },
];

/// Look up a matrix definition by name.
pub fn find(name: &str) -> Option<&'static MatrixSource> {
    MATRICES.iter().find(|m| m.name == name)
}

/// All known matrix names.
pub fn names() -> impl Iterator<Item = &'static str> {
    MATRICES.iter().map(|m| m.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_matrix() {
        let enterprise = find("Enterprise").unwrap();
        assert_eq!(enterprise.file, "enterprise-attack.json");
        assert!(find("NoSuchMatrix").is_none());
    }
}
