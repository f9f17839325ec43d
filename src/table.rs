// GPU-DVFS PERFORMANCE TABLE
// ORDERED, VALIDATED, IMMUTABLE AFTER CONSTRUCTION.
//
// TEXT FORMAT (ONE LEVEL PER LINE, '#' STARTS A COMMENT):
//   clock_khz voltage_uv up down stay mem_khz int_khz cpu_khz

use regex::Regex;

use crate::error::TableError;

// ONE ROW AS SUPPLIED BY PLATFORM DATA, BEFORE INDICES ARE ASSIGNED
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSpec {
    pub clock_khz: u32,
    pub voltage_uv: u32,
    pub up_threshold: u8,
    pub down_threshold: u8,
    pub stay_count: u32,
    pub mem_freq_hint: u32,
    pub int_freq_hint: u32,
    pub cpu_freq_hint: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PerformanceLevel {
    pub index: u32,
    pub clock_khz: u32,
    pub voltage_uv: u32,
    pub up_threshold: u8,
    pub down_threshold: u8,
    pub stay_count: u32,
    pub mem_freq_hint: u32,
    pub int_freq_hint: u32,
    pub cpu_freq_hint: u32,
}

#[derive(Clone, Debug)]
pub struct PerformanceTable {
    levels: Vec<PerformanceLevel>,
}

// DEFAULT TABLE
// MALI-CLASS GPU, 7 STEPS. LOWEST STEP NEVER STEPS DOWN (down=0).

const DEFAULT_LEVELS: [LevelSpec; 7] = [
    LevelSpec { clock_khz: 100_000, voltage_uv: 812_500, up_threshold: 70,  down_threshold: 0,  stay_count: 3, mem_freq_hint: 160_000, int_freq_hint: 100_000, cpu_freq_hint: 0 },
    LevelSpec { clock_khz: 160_000, voltage_uv: 850_000, up_threshold: 90,  down_threshold: 60, stay_count: 3, mem_freq_hint: 160_000, int_freq_hint: 100_000, cpu_freq_hint: 0 },
    LevelSpec { clock_khz: 266_000, voltage_uv: 887_500, up_threshold: 90,  down_threshold: 54, stay_count: 3, mem_freq_hint: 400_000, int_freq_hint: 200_000, cpu_freq_hint: 0 },
    LevelSpec { clock_khz: 350_000, voltage_uv: 925_000, up_threshold: 90,  down_threshold: 70, stay_count: 2, mem_freq_hint: 400_000, int_freq_hint: 200_000, cpu_freq_hint: 0 },
    LevelSpec { clock_khz: 400_000, voltage_uv: 950_000, up_threshold: 90,  down_threshold: 78, stay_count: 2, mem_freq_hint: 667_000, int_freq_hint: 333_000, cpu_freq_hint: 800_000 },
    LevelSpec { clock_khz: 450_000, voltage_uv: 987_500, up_threshold: 95,  down_threshold: 80, stay_count: 2, mem_freq_hint: 800_000, int_freq_hint: 400_000, cpu_freq_hint: 1_200_000 },
    LevelSpec { clock_khz: 533_000, voltage_uv: 1_037_500, up_threshold: 100, down_threshold: 85, stay_count: 1, mem_freq_hint: 800_000, int_freq_hint: 400_000, cpu_freq_hint: 1_400_000 },
];

impl PerformanceTable {
    pub fn new(specs: &[LevelSpec]) -> Result<Self, TableError> {
        if specs.is_empty() {
            return Err(TableError::Empty);
        }

        let mut levels = Vec::with_capacity(specs.len());
        for (i, s) in specs.iter().enumerate() {
            let index = i as u32;
            if let Some(prev) = levels.last().map(|l: &PerformanceLevel| l.clock_khz) {
                if s.clock_khz <= prev {
                    return Err(TableError::NotAscending { index, khz: s.clock_khz, prev_khz: prev });
                }
            }
            for t in [s.up_threshold, s.down_threshold] {
                if t > 100 {
                    return Err(TableError::ThresholdRange { index, value: t });
                }
            }
            levels.push(PerformanceLevel {
                index,
                clock_khz: s.clock_khz,
                voltage_uv: s.voltage_uv,
                up_threshold: s.up_threshold,
                down_threshold: s.down_threshold,
                stay_count: s.stay_count,
                mem_freq_hint: s.mem_freq_hint,
                int_freq_hint: s.int_freq_hint,
                cpu_freq_hint: s.cpu_freq_hint,
            });
        }

        Ok(Self { levels })
    }

    pub fn default_table() -> Self {
        Self::new(&DEFAULT_LEVELS).unwrap_or_else(|e| unreachable!("built-in table invalid: {e}"))
    }

    // PER-LEVEL VOLTAGE PATCH FROM CALIBRATION (ASV/BIN) DATA.
    // APPLIED ONCE, AT INIT, BEFORE THE TABLE IS SHARED.
    pub fn with_voltage_override<F>(mut self, mut voltage_override: F) -> Self
    where
        F: FnMut(u32) -> Option<u32>,
    {
        for level in &mut self.levels {
            if let Some(uv) = voltage_override(level.index) {
                level.voltage_uv = uv;
            }
        }
        self
    }

    // PARSE THE TEXT FORMAT. BLANK LINES AND COMMENTS ARE SKIPPED.
    pub fn parse(text: &str) -> Result<Self, TableError> {
        let row = Regex::new(
            r"^\s*(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s*$",
        )
        .map_err(|e| TableError::Parse { line: 0, reason: e.to_string() })?;

        let mut specs = Vec::new();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("");
            if line.trim().is_empty() {
                continue;
            }
            let caps = row.captures(line).ok_or_else(|| TableError::Parse {
                line: n + 1,
                reason: "expected 8 unsigned integer columns".to_string(),
            })?;

            let field = |i: usize| -> Result<u32, TableError> {
                caps[i].parse::<u32>().map_err(|e| TableError::Parse {
                    line: n + 1,
                    reason: format!("column {}: {}", i, e),
                })
            };
            let threshold = |i: usize| -> Result<u8, TableError> {
                let v = field(i)?;
                u8::try_from(v).map_err(|_| TableError::Parse {
                    line: n + 1,
                    reason: format!("column {}: threshold {} out of range", i, v),
                })
            };

            specs.push(LevelSpec {
                clock_khz: field(1)?,
                voltage_uv: field(2)?,
                up_threshold: threshold(3)?,
                down_threshold: threshold(4)?,
                stay_count: field(5)?,
                mem_freq_hint: field(6)?,
                int_freq_hint: field(7)?,
                cpu_freq_hint: field(8)?,
            });
        }

        Self::new(&specs)
    }

    // EXACT MATCH. USED TO RECOVER THE BOOT LEVEL FROM THE HARDWARE CLOCK.
    pub fn level_for_clock(&self, clock_khz: u32) -> Option<u32> {
        self.levels
            .binary_search_by_key(&clock_khz, |l| l.clock_khz)
            .ok()
            .map(|i| i as u32)
    }

    // HIGHEST LEVEL WHOSE CLOCK DOES NOT EXCEED clock_khz
    pub fn level_at_or_below(&self, clock_khz: u32) -> Option<u32> {
        let n = self.levels.partition_point(|l| l.clock_khz <= clock_khz);
        n.checked_sub(1).map(|i| i as u32)
    }

    // PANICS ON AN OUT-OF-RANGE INDEX. CALLERS VALIDATE FIRST.
    pub fn level(&self, index: u32) -> &PerformanceLevel {
        &self.levels[index as usize]
    }

    pub fn get(&self, index: u32) -> Option<&PerformanceLevel> {
        self.levels.get(index as usize)
    }

    pub fn len(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn max_index(&self) -> u32 {
        self.len() - 1
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceLevel> {
        self.levels.iter()
    }
}
