use std::path::PathBuf;

/// One downloaded clip after probing, ready for concatenation planning.
#[derive(Debug, Clone)]
pub struct ClipDescriptor {
    pub path: PathBuf,
    pub duration: f64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub has_audio: bool,
}

/// Transition applied between adjacent clips. A zero duration means hard
/// cuts; anything else selects the xfade style named here ("fade" blends
/// naturally without warping subjects, which is why it is the default).
#[derive(Debug, Clone)]
pub struct TransitionSpec {
    pub duration: f64,
    pub style: String,
}

impl Default for TransitionSpec {
    fn default() -> Self {
        Self {
            duration: 0.45,
            style: "fade".to_string(),
        }
    }
}

impl TransitionSpec {
    pub fn hard_cut() -> Self {
        Self {
            duration: 0.0,
            style: "fade".to_string(),
        }
    }

    pub fn is_hard_cut(&self) -> bool {
        self.duration == 0.0
    }
}

/// One stage of a filter graph: labeled input pads, the filter expression,
/// labeled output pads. Source filters (anullsrc) have no inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<String>,
    pub filter: String,
    pub outputs: Vec<String>,
}

impl FilterChain {
    fn new<S: AsRef<str>>(inputs: &[S], filter: impl Into<String>, outputs: &[S]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.as_ref().to_string()).collect(),
            filter: filter.into(),
            outputs: outputs.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

/// A planned concatenation graph. Kept as structured stages so the offset
/// and trim arithmetic is testable; `render` flattens it to the external
/// tool's textual syntax only at the invocation boundary.
#[derive(Debug, Clone)]
pub struct FilterGraph {
    pub chains: Vec<FilterChain>,
    pub video_out: String,
    pub audio_out: String,
}

impl FilterGraph {
    pub fn render(&self) -> String {
        self.chains
            .iter()
            .map(|chain| {
                let mut s = String::new();
                for input in &chain.inputs {
                    s.push('[');
                    s.push_str(input);
                    s.push(']');
                }
                s.push_str(&chain.filter);
                for output in &chain.outputs {
                    s.push('[');
                    s.push_str(output);
                    s.push(']');
                }
                s
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Three-decimal rounding; more precision than this makes the external
/// tool's expression parser reject the graph on floating-point noise.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn fmt3(x: f64) -> String {
    let r = round3(x);
    if r == r.trunc() {
        format!("{}", r as i64)
    } else {
        r.to_string()
    }
}

/// Where each crossfade begins on the progressively merged timeline:
/// offset_0 = d_0 - t, offset_i = offset_{i-1} + d_i - t, clamped at zero.
pub fn crossfade_offsets(durations: &[f64], transition: f64) -> Vec<f64> {
    let mut offsets = Vec::new();
    if durations.len() < 2 {
        return offsets;
    }
    let mut cursor = (durations[0] - transition).max(0.0);
    offsets.push(round3(cursor));
    for duration in &durations[1..durations.len() - 1] {
        cursor = (cursor + duration - transition).max(0.0);
        offsets.push(round3(cursor));
    }
    offsets
}

fn silent_source(duration: f64, uniform_format: bool) -> String {
    let mut filter = format!(
        "anullsrc=channel_layout=stereo:sample_rate=48000,atrim=0:{}",
        fmt3(duration)
    );
    if uniform_format {
        filter.push_str(",aformat=sample_rates=48000:channel_layouts=stereo");
    }
    filter
}

/// Direct stream concatenation. Clips without an audio stream get a
/// synthesized silent track covering their full probed duration, so every
/// input contributes one audio stream of identical format and the concat
/// filter never sees a stream-count mismatch.
pub fn plan_hard_cut(clips: &[ClipDescriptor]) -> FilterGraph {
    let n = clips.len();
    let mut chains = Vec::new();

    let video_inputs: Vec<String> = (0..n).map(|i| format!("{}:v", i)).collect();
    chains.push(FilterChain {
        inputs: video_inputs,
        filter: format!("concat=n={}:v=1:a=0", n),
        outputs: vec!["vout".to_string()],
    });

    for (i, clip) in clips.iter().enumerate() {
        let label = format!("a{}", i);
        if clip.has_audio {
            chains.push(FilterChain::new(
                &[&format!("{}:a", i)],
                "aformat=sample_rates=48000:channel_layouts=stereo",
                &[&label],
            ));
        } else {
            chains.push(FilterChain::new(
                &[],
                silent_source(clip.duration, true),
                &[&label],
            ));
        }
    }

    let audio_inputs: Vec<String> = (0..n).map(|i| format!("a{}", i)).collect();
    chains.push(FilterChain {
        inputs: audio_inputs,
        filter: format!("concat=n={}:v=0:a=1", n),
        outputs: vec!["aout".to_string()],
    });

    FilterGraph {
        chains,
        video_out: "vout".to_string(),
        audio_out: "aout".to_string(),
    }
}

/// Pairwise xfade chain with a running offset cursor, plus per-clip audio
/// trimmed to the visual overlap each transition removes: the first clip
/// keeps [0, d-t], interior clips [t, d-t], the last [t, end]. Audio-less
/// clips get silence sized to the same trimmed window.
pub fn plan_crossfade(clips: &[ClipDescriptor], transition: &TransitionSpec) -> FilterGraph {
    let n = clips.len();
    let t = transition.duration;
    let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
    let offsets = crossfade_offsets(&durations, t);
    let mut chains = Vec::new();

    let mut current = "0:v".to_string();
    for i in 1..n {
        let out = if i == n - 1 {
            "vout".to_string()
        } else {
            format!("vt{}", i)
        };
        chains.push(FilterChain {
            inputs: vec![current.clone(), format!("{}:v", i)],
            filter: format!(
                "xfade=transition={}:duration={}:offset={}",
                transition.style,
                fmt3(t),
                fmt3(offsets[i - 1])
            ),
            outputs: vec![out.clone()],
        });
        current = out;
    }

    for (i, clip) in clips.iter().enumerate() {
        let label = format!("a{}", i);
        let first = i == 0;
        let last = i == n - 1;

        if clip.has_audio {
            let filter = if first {
                format!("atrim=0:{}", fmt3((clip.duration - t).max(0.0)))
            } else if last {
                format!("atrim={}", fmt3(t))
            } else {
                format!("atrim={}:{}", fmt3(t), fmt3((clip.duration - t).max(0.0)))
            };
            chains.push(FilterChain::new(&[&format!("{}:a", i)], filter, &[&label]));
        } else {
            let silent_duration = if first || last {
                (clip.duration - t).max(0.0)
            } else {
                (clip.duration - 2.0 * t).max(0.0)
            };
            chains.push(FilterChain::new(
                &[],
                silent_source(silent_duration, false),
                &[&label],
            ));
        }
    }

    let audio_inputs: Vec<String> = (0..n).map(|i| format!("a{}", i)).collect();
    chains.push(FilterChain {
        inputs: audio_inputs,
        filter: format!("concat=n={}:v=0:a=1", n),
        outputs: vec!["aout".to_string()],
    });

    FilterGraph {
        chains,
        video_out: "vout".to_string(),
        audio_out: "aout".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(duration: f64, has_audio: bool) -> ClipDescriptor {
        ClipDescriptor {
            path: PathBuf::from("clip.mp4"),
            duration,
            width: Some(1280),
            height: Some(720),
            has_audio,
        }
    }

    #[test]
    fn offsets_accumulate_along_the_merged_timeline() {
        let offsets = crossfade_offsets(&[5.0, 4.0, 6.0], 0.5);
        assert_eq!(offsets, vec![4.5, 8.0]);
    }

    #[test]
    fn offsets_clamp_at_zero() {
        let offsets = crossfade_offsets(&[0.3, 5.0], 0.5);
        assert_eq!(offsets, vec![0.0]);
    }

    #[test]
    fn offsets_are_rounded_to_three_decimals() {
        let offsets = crossfade_offsets(&[4.444444, 3.333333, 2.0], 0.45);
        assert_eq!(offsets, vec![3.994, 6.878]);
    }

    #[test]
    fn no_offsets_for_fewer_than_two_clips() {
        assert!(crossfade_offsets(&[5.0], 0.5).is_empty());
        assert!(crossfade_offsets(&[], 0.5).is_empty());
    }

    #[test]
    fn crossfade_chains_thread_through_intermediate_pads() {
        let clips = vec![clip(5.0, true), clip(4.0, true), clip(6.0, true)];
        let transition = TransitionSpec {
            duration: 0.5,
            style: "fade".to_string(),
        };
        let graph = plan_crossfade(&clips, &transition);
        let rendered = graph.render();

        assert!(rendered.contains(
            "[0:v][1:v]xfade=transition=fade:duration=0.5:offset=4.5[vt1]"
        ));
        assert!(rendered.contains(
            "[vt1][2:v]xfade=transition=fade:duration=0.5:offset=8[vout]"
        ));
    }

    #[test]
    fn crossfade_audio_windows_match_the_visual_overlap() {
        let clips = vec![clip(5.0, true), clip(4.0, true), clip(6.0, true)];
        let transition = TransitionSpec {
            duration: 0.5,
            style: "fade".to_string(),
        };
        let rendered = plan_crossfade(&clips, &transition).render();

        // first: [0, d-t]; interior: [t, d-t]; last: [t, end]
        assert!(rendered.contains("[0:a]atrim=0:4.5[a0]"));
        assert!(rendered.contains("[1:a]atrim=0.5:3.5[a1]"));
        assert!(rendered.contains("[2:a]atrim=0.5[a2]"));
        assert!(rendered.contains("[a0][a1][a2]concat=n=3:v=0:a=1[aout]"));
    }

    #[test]
    fn crossfade_synthesizes_silence_sized_to_the_trimmed_window() {
        let clips = vec![clip(5.0, true), clip(4.0, false), clip(6.0, false)];
        let transition = TransitionSpec {
            duration: 0.5,
            style: "fade".to_string(),
        };
        let rendered = plan_crossfade(&clips, &transition).render();

        // interior silent clip: d - 2t; last silent clip: d - t
        assert!(rendered
            .contains("anullsrc=channel_layout=stereo:sample_rate=48000,atrim=0:3[a1]"));
        assert!(rendered
            .contains("anullsrc=channel_layout=stereo:sample_rate=48000,atrim=0:5.5[a2]"));
    }

    #[test]
    fn hard_cut_concatenates_video_and_audio_separately() {
        let clips = vec![clip(5.0, true), clip(4.0, true)];
        let rendered = plan_hard_cut(&clips).render();

        assert!(rendered.contains("[0:v][1:v]concat=n=2:v=1:a=0[vout]"));
        assert!(rendered
            .contains("[0:a]aformat=sample_rates=48000:channel_layouts=stereo[a0]"));
        assert!(rendered.contains("[a0][a1]concat=n=2:v=0:a=1[aout]"));
    }

    #[test]
    fn hard_cut_silence_covers_the_full_clip_duration() {
        // One clip with audio, one without: the silent track must span the
        // whole second clip so total audio equals the sum of both durations.
        let clips = vec![clip(5.25, true), clip(4.75, false)];
        let rendered = plan_hard_cut(&clips).render();

        assert!(rendered.contains(
            "anullsrc=channel_layout=stereo:sample_rate=48000,atrim=0:4.75,aformat=sample_rates=48000:channel_layouts=stereo[a1]"
        ));
        assert!(rendered.contains("[a0][a1]concat=n=2:v=0:a=1[aout]"));
    }

    #[test]
    fn render_joins_stages_with_semicolons() {
        let graph = FilterGraph {
            chains: vec![
                FilterChain::new(&["0:v"], "scale=1280:720", &["v0"]),
                FilterChain::new(&["v0", "1:v"], "overlay", &["vout"]),
            ],
            video_out: "vout".to_string(),
            audio_out: "aout".to_string(),
        };
        assert_eq!(
            graph.render(),
            "[0:v]scale=1280:720[v0];[v0][1:v]overlay[vout]"
        );
    }
}
