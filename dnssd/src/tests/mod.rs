use std::sync::Once;

static INIT: Once = Once::new();

pub(crate) fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

mod transaction_test;
