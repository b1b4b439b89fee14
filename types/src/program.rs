use std::fmt::Write as _;

/// How a client-side timer counts during a breathing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TimerPattern {
    Incremental,
    Decremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreathingAction {
    pub instruction: &'static str,
    #[serde(rename = "interval")]
    pub interval_secs: u32,
    pub timer_pattern: TimerPattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreathingProgram {
    pub name: &'static str,
    pub slug: &'static str,
    pub origin: &'static str,
    pub description: &'static str,
    pub total_cycles: u32,
    pub actions: &'static [BreathingAction],
}

pub const PROGRAMS: &[BreathingProgram] = &[
    BreathingProgram {
        name: "4-7-8 Breathing",
        slug: "4-7-8-breathing",
        origin: "Pranayama",
        description: "A powerful relaxation technique using a 4-7-8 rhythm to calm the nervous system and support sleep.",
        total_cycles: 4,
        actions: &[
            BreathingAction {
                instruction: "Inhale deeply through your nose",
                interval_secs: 4,
                timer_pattern: TimerPattern::Incremental,
                description: Some("Inhale smoothly for 4 seconds"),
            },
            BreathingAction {
                instruction: "Hold your breath",
                interval_secs: 7,
                timer_pattern: TimerPattern::Decremental,
                description: Some("Hold gently for 7 seconds"),
            },
            BreathingAction {
                instruction: "Exhale slowly through your mouth",
                interval_secs: 8,
                timer_pattern: TimerPattern::Decremental,
                description: Some("Exhale slowly for 8 seconds"),
            },
        ],
    },
    BreathingProgram {
        name: "Balancing Breath",
        slug: "balancing-breath",
        origin: "Pranayama",
        description: "Equal-ratio breathing to restore balance and regulate stress.",
        total_cycles: 6,
        actions: &[
            BreathingAction {
                instruction: "Inhale deeply",
                interval_secs: 4,
                timer_pattern: TimerPattern::Incremental,
                description: None,
            },
            BreathingAction {
                instruction: "Exhale gently",
                interval_secs: 4,
                timer_pattern: TimerPattern::Decremental,
                description: None,
            },
        ],
    },
];

/// Looks up a program by slug, ignoring ASCII case and surrounding whitespace.
pub fn find_program(slug: &str) -> Option<&'static BreathingProgram> {
    let slug = slug.trim();
    PROGRAMS.iter().find(|p| p.slug.eq_ignore_ascii_case(slug))
}

impl BreathingProgram {
    /// Seconds taken by a single cycle of all actions.
    pub fn cycle_secs(&self) -> u32 {
        self.actions.iter().map(|a| a.interval_secs).sum()
    }

    /// Plain-text description of the rhythm, suitable for a model prompt.
    pub fn rhythm(&self) -> String {
        let mut text = format!(
            "Exercise: {} ({}). {}\nRepeat the following for {} cycles:",
            self.name, self.origin, self.description, self.total_cycles
        );
        for (i, action) in self.actions.iter().enumerate() {
            let _ = write!(
                text,
                "\n{}. {} for {} seconds.",
                i + 1,
                action.instruction,
                action.interval_secs
            );
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_programs_by_slug() {
        let program = find_program("4-7-8-breathing").unwrap();
        assert_eq!(program.name, "4-7-8 Breathing");
        assert_eq!(program.cycle_secs(), 19);

        assert_eq!(find_program(" Balancing-Breath ").unwrap().total_cycles, 6);
        assert!(find_program("breathing").is_none());
    }

    #[test]
    fn rhythm_lists_every_action() {
        let rhythm = find_program("4-7-8-breathing").unwrap().rhythm();
        assert!(rhythm.contains("Repeat the following for 4 cycles:"));
        assert!(rhythm.contains("1. Inhale deeply through your nose for 4 seconds."));
        assert!(rhythm.contains("2. Hold your breath for 7 seconds."));
        assert!(rhythm.contains("3. Exhale slowly through your mouth for 8 seconds."));
    }

    #[test]
    fn serializes_in_client_shape() {
        let value = serde_json::to_value(find_program("balancing-breath").unwrap()).unwrap();
        assert_eq!(value["totalCycles"], 6);
        assert_eq!(value["actions"][0]["interval"], 4);
        assert_eq!(value["actions"][0]["timerPattern"], "Incremental");
        assert!(value["actions"][0].get("description").is_none());
    }
}
