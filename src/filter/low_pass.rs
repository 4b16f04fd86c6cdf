use heapless::HistoryBuffer;

use super::{FilterCoefficients, FilterStage};
use crate::fixed_point::{double_to_single, saturate_double, single_to_double, Double, Single};

/// Shifts larger than this leave the filter effectively frozen.
const MAX_SHIFT: u8 = 30;

/// Two cascaded first-order low-pass sections.
///
/// Each section moves towards its input by `(input - state) >> shift`, with `a` the shift of the
/// first section and `b` the shift of the second. A shift of `n` gives a time constant of roughly
/// `2^n` samples; a shift of 0 passes the input straight through.
///
/// Peaks are local extrema of the last three outputs.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    coefficients: FilterCoefficients,
    input: Double,
    first: Double,
    second: Double,
    outputs: HistoryBuffer<Double, 3>,
    pos_peak: Option<Single>,
    neg_peak: Option<Single>,
}

impl LowPassFilter {
    pub const fn new(coefficients: FilterCoefficients) -> Self {
        Self {
            coefficients,
            input: Double::ZERO,
            first: Double::ZERO,
            second: Double::ZERO,
            outputs: HistoryBuffer::new(),
            pos_peak: None,
            neg_peak: None,
        }
    }

    pub const fn coefficients(&self) -> FilterCoefficients {
        self.coefficients
    }

    fn step(&mut self, input: Double) {
        self.input = input;
        self.first = smooth(self.first, input, self.coefficients.a);
        self.second = smooth(self.second, self.first, self.coefficients.b);
        self.outputs.write(self.second);
        self.track_peaks();
    }

    fn track_peaks(&mut self) {
        let mut outputs = self.outputs.oldest_ordered().copied();
        let (Some(older), Some(middle), Some(newest)) =
            (outputs.next(), outputs.next(), outputs.next())
        else {
            return;
        };

        if middle > older && middle >= newest {
            self.pos_peak = Some(double_to_single(middle));
        } else if middle < older && middle <= newest {
            self.neg_peak = Some(double_to_single(middle));
        }
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new(FilterCoefficients::default())
    }
}

fn smooth(state: Double, input: Double, shift: u8) -> Double {
    let state = i64::from(state.to_bits());
    let delta = i64::from(input.to_bits()) - state;
    saturate_double(state + (delta >> shift.min(MAX_SHIFT)))
}

impl FilterStage for LowPassFilter {
    fn init(&mut self, seed: Single) {
        let seed = single_to_double(seed);
        self.input = seed;
        self.first = seed;
        self.second = seed;
        self.outputs.clear();
        self.outputs.write(seed);
        self.pos_peak = None;
        self.neg_peak = None;
    }

    fn add(&mut self, value: Single) {
        self.step(single_to_double(value));
    }

    fn add_double(&mut self, value: Double) {
        self.step(value);
    }

    fn read_input(&self) -> Single {
        double_to_single(self.input)
    }

    fn read_output(&self) -> Single {
        double_to_single(self.second)
    }

    fn read_output_double(&self) -> Double {
        self.second
    }

    fn detect_pos_peak(&self) -> Option<Single> {
        self.pos_peak
    }

    fn detect_neg_peak(&self) -> Option<Single> {
        self.neg_peak
    }

    fn set_coefficients(&mut self, coefficients: FilterCoefficients) {
        self.coefficients = coefficients;
    }
}
