// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `dmabuf config` command: print the effective configuration.

use dma_buffer::AllocatorConfig;

pub fn execute(config: &AllocatorConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
