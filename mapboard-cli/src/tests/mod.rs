//! Shared test harness modules for the Mapboard topology CLI.

use super::*;
