use std::sync::LazyLock;

use crate::logger::Logger;
use crate::remote_config::constants::REMOTE_CONFIG_LOGGER_NAME;

pub(crate) static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new(REMOTE_CONFIG_LOGGER_NAME));
