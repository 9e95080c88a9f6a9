use crossterm::event::KeyCode;
use log::debug;
use ratatui::widgets::ListState;
use std::time::Instant;

use crate::catalog::{self, Station};
use crate::player::{PlaybackBackend, PlayerContext};
use crate::timer::SleepTimer;

/// Which optional panel elements are rendered. One panel with a
/// configuration object, instead of per-variant copies of the player.
#[derive(Debug, Clone, Copy)]
pub struct PanelOptions {
    pub show_seek_bar: bool,
    pub show_countdown: bool,
    pub show_download: bool,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            show_seek_bar: true,
            show_countdown: true,
            show_download: true,
        }
    }
}

const SEEK_STEP_SECS: f64 = 10.0;

pub struct AppController<B: PlaybackBackend> {
    pub ctx: PlayerContext<B>,
    pub stations: Vec<Station>,
    pub genres: Vec<String>,
    /// 0 = all genres, otherwise index+1 into `genres`.
    pub genre_index: usize,
    pub search: String,
    pub search_active: bool,
    /// Selection index into the currently visible (filtered) list.
    pub selected: usize,
    pub sleep: SleepTimer,
    pub options: PanelOptions,
    pub list_state: ListState,
    pub should_quit: bool,
}

impl<B: PlaybackBackend> AppController<B> {
    pub fn new(ctx: PlayerContext<B>, stations: Vec<Station>, options: PanelOptions) -> Self {
        let genres = catalog::genres(&stations);
        let mut list_state = ListState::default();
        if !stations.is_empty() {
            list_state.select(Some(0));
        }

        Self {
            ctx,
            stations,
            genres,
            genre_index: 0,
            search: String::new(),
            search_active: false,
            selected: 0,
            sleep: SleepTimer::new(),
            options,
            list_state,
            should_quit: false,
        }
    }

    /// The genre filter currently in effect; empty string means all genres.
    pub fn current_genre(&self) -> &str {
        if self.genre_index == 0 {
            ""
        } else {
            &self.genres[self.genre_index - 1]
        }
    }

    /// Stations visible under the current genre + search filters.
    pub fn visible(&self) -> Vec<&Station> {
        catalog::filter_stations(&self.stations, self.current_genre(), &self.search)
    }

    pub fn handle_key(&mut self, key_code: KeyCode) {
        if self.search_active {
            self.handle_search_key(key_code);
            return;
        }

        match key_code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.quit();
            }
            KeyCode::Up => self.previous_station(),
            KeyCode::Down => self.next_station(),
            KeyCode::Enter => self.play_selected(),
            KeyCode::Char(' ') => self.ctx.toggle_play(),
            KeyCode::Char('t') | KeyCode::Char('T') => {
                self.sleep.cycle(Instant::now());
            }
            KeyCode::Char('/') => {
                self.search_active = true;
            }
            KeyCode::Char('g') => self.cycle_genre(1),
            KeyCode::Char('G') => self.cycle_genre(-1),
            KeyCode::Char('d') | KeyCode::Char('D') => {
                if self.options.show_download {
                    self.ctx.download();
                }
            }
            KeyCode::Left => self.seek_relative(-SEEK_STEP_SECS),
            KeyCode::Right => self.seek_relative(SEEK_STEP_SECS),
            KeyCode::Char(c) if c.is_ascii_digit() => {
                self.select_station_by_number(c);
            }
            _ => {}
        }
    }

    fn handle_search_key(&mut self, key_code: KeyCode) {
        match key_code {
            KeyCode::Esc => {
                // Cancel: drop the filter entirely
                self.search.clear();
                self.search_active = false;
                self.reset_selection();
            }
            KeyCode::Enter => {
                self.search_active = false;
            }
            KeyCode::Backspace => {
                self.search.pop();
                self.reset_selection();
            }
            KeyCode::Char(c) => {
                self.search.push(c);
                self.reset_selection();
            }
            _ => {}
        }
    }

    /// Advance the event-driven parts of the app: fold playback events into
    /// the shared state and check the sleep-timer deadline.
    pub fn tick(&mut self, now: Instant) {
        self.ctx.pump_events();

        if self.sleep.tick(now) {
            // Auto-stop on expiry; never start playback from a timer.
            if self.ctx.state.is_playing {
                debug!("sleep timer expired, stopping playback");
                self.ctx.toggle_play();
            } else {
                debug!("sleep timer expired while not playing");
            }
        }

        self.clamp_selection();
    }

    pub fn quit(&mut self) {
        self.ctx.stop();
        self.sleep.clear();
        self.should_quit = true;
    }

    fn play_selected(&mut self) {
        let station = self.visible().get(self.selected).map(|s| (*s).clone());
        if let Some(station) = station {
            self.ctx.play_station(&station);
        }
    }

    fn next_station(&mut self) {
        let len = self.visible().len();
        if len > 0 {
            self.selected = (self.selected + 1) % len;
            self.list_state.select(Some(self.selected));
        }
    }

    fn previous_station(&mut self) {
        let len = self.visible().len();
        if len > 0 {
            self.selected = if self.selected == 0 {
                len - 1
            } else {
                self.selected - 1
            };
            self.list_state.select(Some(self.selected));
        }
    }

    fn select_station_by_number(&mut self, digit: char) {
        let index = digit.to_digit(10).unwrap_or(0) as usize;
        let len = self.visible().len();
        if index > 0 && index <= len {
            self.selected = index - 1;
            self.list_state.select(Some(self.selected));
        }
    }

    fn cycle_genre(&mut self, direction: isize) {
        let slots = self.genres.len() + 1; // genres plus "all"
        let current = self.genre_index as isize;
        self.genre_index = (current + direction).rem_euclid(slots as isize) as usize;
        self.reset_selection();
    }

    fn seek_relative(&mut self, delta: f64) {
        // Live radio has no duration and therefore no seeking
        if self.ctx.state.has_duration() {
            let target = self.ctx.state.position_secs + delta;
            self.ctx.seek(target);
        }
    }

    fn reset_selection(&mut self) {
        self.selected = 0;
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        let len = self.visible().len();
        if len == 0 {
            self.selected = 0;
            self.list_state.select(None);
        } else {
            self.selected = self.selected.min(len - 1);
            self.list_state.select(Some(self.selected));
        }
    }
}
