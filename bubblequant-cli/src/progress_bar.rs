use std::sync::{Arc, Mutex};
use std::time::Duration;

use bubblequant::progress::ProgressNotifier;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

#[derive(Debug)]
struct BqProgressBarState {
    length: u64,
    message: String,
    initialized: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BqProgressBar {
    bar: ProgressBar,
    state: Arc<Mutex<BqProgressBarState>>,
}

impl BqProgressBar {
    pub fn new() -> BqProgressBar {
        let init_bar = ProgressBar::hidden();
        init_bar.set_style(ProgressStyle::default_spinner());
        init_bar.enable_steady_tick(Duration::from_millis(50));
        init_bar.set_message("Initializing...");

        Self {
            bar: init_bar,
            state: Arc::new(Mutex::new(BqProgressBarState {
                length: 0,
                message: String::new(),
                initialized: false,
            })),
        }
    }

    pub fn show(&self) {
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear()
    }

    fn init(&self) {
        let mut state = self.state.lock().expect("Could not acquire progress bar lock");
        if state.initialized {
            return;
        }

        self.bar.set_position(0);
        self.bar.set_message(state.message.clone());
        if state.length == 0 {
            self.bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {pos}/? ({per_sec}) {msg}")
                    .expect("Invalid progress bar template"),
            );
        } else {
            self.bar.set_length(state.length);
            self.bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} {wide_bar} {pos}/{len} [ETA {eta}]")
                    .expect("Invalid progress bar template"),
            );
        }
        state.initialized = true;
    }

    /// Sets the label shown next to the bar on the next update.
    pub fn set_message<S: Into<String>>(&self, message: S) {
        let mut state = self.state.lock().expect("Could not acquire progress bar lock");

        state.initialized = false;
        state.message = message.into();
    }

    pub fn set_length(&self, length: u64) {
        let mut state = self.state.lock().expect("Could not acquire progress bar lock");

        state.initialized = false;
        state.length = length;
    }

    pub fn inc(&self, value: u64) {
        self.init();
        self.bar.inc(value);
    }

    pub fn println<I: AsRef<str>>(&self, msg: I) {
        self.bar.println(msg);
    }
}

impl ProgressNotifier for BqProgressBar {
    fn set_iter_num(&self, num_iter: u64) {
        self.set_length(num_iter);
        self.init();
    }

    fn inc_iter(&self) {
        self.inc(1);
    }
}
