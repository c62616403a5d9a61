// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::time::Duration;

pub mod size {
    #![allow(non_upper_case_globals)]

    pub const KiB: u64 = 1024;
    pub const MiB: u64 = 1024 * KiB;
    pub const GiB: u64 = 1024 * MiB;
    pub const TiB: u64 = 1024 * GiB;
}

/// Format a byte count with a binary unit suffix and `decimals` digits.
pub fn format_size(bytes: u64, decimals: usize) -> String {
    const UNITS: [(u64, &str); 4] = [
        (size::TiB, "TiB"),
        (size::GiB, "GiB"),
        (size::MiB, "MiB"),
        (size::KiB, "KiB"),
    ];

    for (unit, suffix) in UNITS {
        if bytes >= unit {
            return format!("{:.*} {}", decimals, bytes as f64 / unit as f64, suffix);
        }
    }

    format!("{bytes} B")
}

/// Hostname used to identify local snapshot sources.
pub fn current_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| String::from("localhost"))
}

/// Username used to identify local snapshot sources.
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| String::from("nobody"))
}

/// Human readable duration (h/min/s, sub-second durations in ms).
pub fn pretty_print_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        return format!("{} ms", duration.as_millis());
    }

    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    match (hours, mins) {
        (0, 0) => format!("{secs} s"),
        (0, _) => format!("{mins} min {secs} s"),
        _ => format!("{hours} h {mins} min {secs} s"),
    }
}
