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

pub mod table;

use indicatif::ProgressDrawTarget;

pub const PROGRESS_REFRESH_RATE_HZ: u32 = 8;
pub const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Draw target for progress bars. Hidden in quiet mode so that scripted
/// invocations don't get escape codes on stderr.
pub fn default_bar_draw_target() -> ProgressDrawTarget {
    if crate::global::global_opts().quiet {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr_with_hz(PROGRESS_REFRESH_RATE_HZ as u8)
    }
}

#[macro_export]
macro_rules! __cli_log {
    () => {
        if !$crate::global::global_opts().quiet {
            eprintln!();
        }
    };
    ($($arg:tt)*) => {
        if !$crate::global::global_opts().quiet {
            eprintln!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! __cli_warning {
    ($($arg:tt)*) => {
        if !$crate::global::global_opts().quiet {
            eprintln!("{} {}", colored::Colorize::yellow("warning:"), format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! __cli_error {
    ($($arg:tt)*) => {
        eprintln!("{} {}", colored::Colorize::red("error:"), format!($($arg)*));
    };
}

#[macro_export]
macro_rules! __cli_verbose_1 {
    ($($arg:tt)*) => {
        {
            let opts = $crate::global::global_opts();
            if !opts.quiet && opts.verbosity >= 1 {
                eprintln!($($arg)*);
            }
        }
    };
}

#[macro_export]
macro_rules! __cli_verbose_2 {
    ($($arg:tt)*) => {
        {
            let opts = $crate::global::global_opts();
            if !opts.quiet && opts.verbosity >= 2 {
                eprintln!($($arg)*);
            }
        }
    };
}

pub mod cli {
    pub use crate::__cli_error as error;
    pub use crate::__cli_log as log;
    pub use crate::__cli_verbose_1 as verbose_1;
    pub use crate::__cli_verbose_2 as verbose_2;
    pub use crate::__cli_warning as warning;
}
