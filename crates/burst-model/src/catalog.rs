//! Static instance-family catalog.
//!
//! Maps shape families to their fabric capabilities and network class.
//! Kept as compile-time tables; the family lists feed the analyzer's
//! preference ordering and the provisioner's sizing fallbacks.

/// Capabilities of one instance family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceFamily {
    pub name: &'static str,
    pub supports_fabric: bool,
    pub fabric_generation: u8,
    pub network_class: &'static str,
    pub hpc_optimized: bool,
}

/// HPC-optimized families, fastest interconnect first.
pub const HPC_FAMILIES: &[InstanceFamily] = &[
    InstanceFamily {
        name: "hpc7a",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "300 Gbps",
        hpc_optimized: true,
    },
    InstanceFamily {
        name: "hpc6id",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "200 Gbps",
        hpc_optimized: true,
    },
    InstanceFamily {
        name: "hpc6a",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "100 Gbps",
        hpc_optimized: true,
    },
];

/// Compute-optimized families with fabric support.
pub const COMPUTE_FABRIC_FAMILIES: &[InstanceFamily] = &[
    InstanceFamily {
        name: "c6in",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "200 Gbps",
        hpc_optimized: false,
    },
    InstanceFamily {
        name: "c6i",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "Up to 50 Gbps",
        hpc_optimized: false,
    },
    InstanceFamily {
        name: "c5n",
        supports_fabric: true,
        fabric_generation: 1,
        network_class: "Up to 100 Gbps",
        hpc_optimized: false,
    },
];

/// Memory-optimized families with fabric support.
pub const MEMORY_FABRIC_FAMILIES: &[InstanceFamily] = &[
    InstanceFamily {
        name: "r6i",
        supports_fabric: true,
        fabric_generation: 2,
        network_class: "Up to 50 Gbps",
        hpc_optimized: false,
    },
    InstanceFamily {
        name: "r5n",
        supports_fabric: true,
        fabric_generation: 1,
        network_class: "Up to 100 Gbps",
        hpc_optimized: false,
    },
];

/// General compute and general-purpose families (no fabric requirement).
pub const GENERAL_FAMILIES: &[&str] = &["c6i", "c5", "m6i", "m5", "r6i", "r5"];

/// Accelerator families, prepended for GPU jobs.
pub const ACCELERATOR_FAMILIES: &[&str] = &["p4d", "p3dn", "g4dn"];

/// Look up a family's fabric capability by name (bare family or full
/// shape like `c5n.xlarge`).
pub fn fabric_support(name: &str) -> Option<&'static InstanceFamily> {
    let family = name.split('.').next().unwrap_or(name);
    HPC_FAMILIES
        .iter()
        .chain(COMPUTE_FABRIC_FAMILIES)
        .chain(MEMORY_FABRIC_FAMILIES)
        .find(|f| f.name == family)
}

/// All families that support the fabric, HPC families first.
pub fn fabric_capable_families() -> impl Iterator<Item = &'static InstanceFamily> {
    HPC_FAMILIES
        .iter()
        .chain(COMPUTE_FABRIC_FAMILIES)
        .chain(MEMORY_FABRIC_FAMILIES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hpc_families_support_fabric() {
        for family in HPC_FAMILIES {
            assert!(family.supports_fabric, "{} should support fabric", family.name);
            assert!(family.hpc_optimized);
            assert_eq!(family.fabric_generation, 2);
        }
    }

    #[test]
    fn lookup_accepts_full_shape_names() {
        let f = fabric_support("c5n.xlarge").expect("c5n is in the catalog");
        assert_eq!(f.name, "c5n");
        assert_eq!(f.fabric_generation, 1);
    }

    #[test]
    fn lookup_misses_non_fabric_families() {
        assert!(fabric_support("m5").is_none());
        assert!(fabric_support("t3.micro").is_none());
    }

    #[test]
    fn capable_families_lead_with_hpc() {
        let first = fabric_capable_families().next().unwrap();
        assert!(first.hpc_optimized);
    }
}
