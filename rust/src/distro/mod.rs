// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Built-in distro definitions.

use anyhow::Result;

use crate::registry::Registry;

pub mod rhel9;

/// A registry holding every built-in distro.
pub fn new_registry() -> Result<Registry> {
    let mut r = Registry::new();
    r.register(rhel9::new_rhel9()?)?;
    r.register(rhel9::new_centos9()?)?;
    Ok(r)
}
