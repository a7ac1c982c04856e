/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

//! Compile OS image blueprints into osbuild manifests.
//!
//! A request names an image type from the [`registry`], a [`blueprint`]
//! with the user's customizations, and [`manifest::ImageOptions`]. The
//! image type first reports the package sets it needs; once those are
//! resolved externally it lowers everything into an [`osbuild::Manifest`].

pub mod blueprint;
pub mod cli;
pub mod container;
pub mod crypt;
pub mod datasizes;
pub mod disk;
pub mod distro;
pub mod error;
pub mod fsnode;
pub mod imageconfig;
pub mod kickstart;
pub mod manifest;
pub mod osbuild;
pub mod pathpolicy;
pub mod platform;
pub mod registry;
pub mod rpmmd;
pub mod utils;
