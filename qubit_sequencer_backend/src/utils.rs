// The "utils" module holds small parsing and unit-conversion helpers shared by the board and
// memory layers.
use once_cell::sync::Lazy;
use regex::Regex;

static BOARD_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<node>\S.*?) (?P<family>DAC|ADC) (?P<number>\d+)$").unwrap()
});

/// Components of a board name as reported by the FPGA server, e.g. `"Vince DAC 11"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardNameParts {
    pub node: String,
    pub family: String,
    pub number: usize,
}

// Expects names of form "<node> DAC <number>" or "<node> ADC <number>" (e.g. "Vince DAC 11").
// Returns None for anything else.
pub fn parse_board_name(name: &str) -> Option<BoardNameParts> {
    let caps = BOARD_NAME.captures(name)?;
    Some(BoardNameParts {
        node: caps["node"].to_string(),
        family: caps["family"].to_string(),
        number: caps["number"].parse::<usize>().ok()?,
    })
}

/// Converts a duration in microseconds to memory-sequencer clock cycles, rounding to the nearest
/// cycle. Negative durations saturate to zero.
pub fn micros_to_cycles(microseconds: f64, clock_mhz: f64) -> u64 {
    (microseconds * clock_mhz).round().max(0.0) as u64
}

/// Rounds `value` up to the next multiple of `grid`.
pub fn ceil_to_grid(value: usize, grid: usize) -> usize {
    value + (grid - value % grid) % grid
}
