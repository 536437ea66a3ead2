//! Next-version calculation.
//!
//! Two increment rules exist:
//!
//! - **Standard** SemVer: a bump resets every lower component to zero.
//! - **Accumulate**: a bump increments only its own component. Development
//!   lines use this so that the count of fixes already shipped there is not
//!   erased by the next feature merge (`0.2.3` + minor = `0.3.3`).
//!
//! Both are pure. The baseline's prerelease and build metadata are dropped.

use semver::Version;
use serde::Serialize;

use crate::environment::Environment;
use crate::policy::VersioningStrategy;
use crate::version::{BumpLevel, ReleaseType, VersionError, VersionResult};

/// Which increment rule to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMode {
    /// Conventional SemVer increments.
    Standard,
    /// Development accumulation; lower components are never reset.
    Accumulate,
}

/// Pick the increment rule for a strategy and target environment.
pub const fn calculation_mode(
    strategy: VersioningStrategy,
    environment: Environment,
) -> CalculationMode {
    match (strategy, environment) {
        (VersioningStrategy::MultiBranch, Environment::Development) => CalculationMode::Accumulate,
        _ => CalculationMode::Standard,
    }
}

/// A freshly computed version, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionCalc {
    /// The new version.
    pub version: Version,
    /// The bump that produced it.
    pub bump: BumpLevel,
    /// Release type recorded alongside the version.
    pub release_type: ReleaseType,
    /// Rule used to compute it.
    pub mode: CalculationMode,
}

/// Standard SemVer increment.
pub fn next_version(current: &Version, level: BumpLevel) -> VersionResult<Version> {
    Ok(match level {
        BumpLevel::Patch => Version::new(
            current.major,
            current.minor,
            increment(current, current.patch, "patch")?,
        ),
        BumpLevel::Minor => Version::new(
            current.major,
            increment(current, current.minor, "minor")?,
            0,
        ),
        BumpLevel::Major => Version::new(increment(current, current.major, "major")?, 0, 0),
    })
}

/// Accumulating increment: only the bumped component changes.
pub fn accumulate_version(current: &Version, level: BumpLevel) -> VersionResult<Version> {
    Ok(match level {
        BumpLevel::Patch => Version::new(
            current.major,
            current.minor,
            increment(current, current.patch, "patch")?,
        ),
        BumpLevel::Minor => Version::new(
            current.major,
            increment(current, current.minor, "minor")?,
            current.patch,
        ),
        BumpLevel::Major => Version::new(
            increment(current, current.major, "major")?,
            current.minor,
            current.patch,
        ),
    })
}

/// Compute the next version from a baseline.
pub fn calculate(
    current: &Version,
    level: BumpLevel,
    mode: CalculationMode,
) -> VersionResult<VersionCalc> {
    let version = match mode {
        CalculationMode::Standard => next_version(current, level)?,
        CalculationMode::Accumulate => accumulate_version(current, level)?,
    };
    Ok(VersionCalc {
        version,
        bump: level,
        release_type: level.into(),
        mode,
    })
}

fn increment(version: &Version, value: u64, component: &'static str) -> VersionResult<u64> {
    value.checked_add(1).ok_or_else(|| VersionError::Overflow {
        version: version.clone(),
        component,
    })
}
