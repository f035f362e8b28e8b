use evlog::{LogEventConsolePrinter, Logger};
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

pub fn set_logger(logger: Logger) {
    if LOGGER.set(logger).is_err() {
        panic!("logger was already registered");
    }
}

pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(|| {
        let mut logger = Logger::default();
        logger.register(LogEventConsolePrinter::default());
        logger
    })
}
