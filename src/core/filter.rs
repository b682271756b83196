//! Classification of discovered devices

/// Name prefixes of the printer family
const TARGET_PREFIXES: &[&str] = &["NT311"];

/// Name fragments of the printer family
const TARGET_MARKERS: &[&str] = &["CLOUDPRINTER", "SUNMI"];

/// Whether a discovered name looks like one of the supported printers
///
/// Only annotates discovery results; devices failing the check stay
/// discoverable and selectable since deployments may rename printers.
pub fn is_likely_target(name: Option<&str>) -> bool {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return false;
    };

    let normalized = name.to_uppercase();
    TARGET_PREFIXES.iter().any(|p| normalized.starts_with(p))
        || TARGET_MARKERS.iter().any(|m| normalized.contains(m))
}
