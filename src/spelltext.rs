//! Spell description macro expansion.
//!
//! Stored spell descriptions carry `$`-prefixed placeholders (`$s1`, `$d`,
//! `$12345o2`, `$lcharge:charges;`, ...) that are resolved against the
//! spell's effect parameters and a few lookup tables before display.
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

static MATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([/*+-])([\d\.]+);([a-z]\d?)").unwrap());
static CROSS_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(\d+)d").unwrap());
static CROSS_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(\d+)s(\d)").unwrap());
static CROSS_OVERTIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)o(\d)").unwrap());
static PLURAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$l([^:]+):([^;]+);").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Effect parameters of one spell, as stored in `spell_template`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MacroContext {
    pub base_points: [i64; 3],
    pub die_sides: [i64; 3],
    pub amplitude: [i64; 3],
    pub chain_target: [i64; 3],
    pub misc_value: [i64; 3],
    pub radius_index: [i64; 3],
    pub proc_chance: i64,
    pub proc_charges: i64,
    pub duration_index: i64,
    pub range_id: i64,
    pub damage_multiplier: f64,
    pub max_affected_targets: i64,
}

impl MacroContext {
    /// Displayed effect values: base + die sides for ranged rolls, else base + 1.
    pub fn values(&self) -> [i64; 3] {
        std::array::from_fn(|i| {
            if self.die_sides[i] > 1 {
                self.base_points[i] + self.die_sides[i]
            } else {
                self.base_points[i] + 1
            }
        })
    }
}

/// Read-only tables consulted during expansion.
///
/// Every method answers `None` when the row is unknown; expansion then falls
/// back to a neutral value or leaves the placeholder alone.
pub trait SpellLookup {
    fn duration_base(&self, duration_index: i64) -> Option<i64>;
    fn radius(&self, radius_index: i64) -> Option<i64>;
    fn range_max(&self, range_id: i64) -> Option<i64>;
    fn macro_context(&self, spell_id: i64) -> Option<MacroContext>;
}

/// Lookup with no tables at all.
pub struct NoLookup;

impl SpellLookup for NoLookup {
    fn duration_base(&self, _: i64) -> Option<i64> {
        None
    }
    fn radius(&self, _: i64) -> Option<i64> {
        None
    }
    fn range_max(&self, _: i64) -> Option<i64> {
        None
    }
    fn macro_context(&self, _: i64) -> Option<MacroContext> {
        None
    }
}

/// Human duration for a duration index: `"N sec"`, `"N min"`, `"N hr"`, or
/// `"duration"` when unknown.
pub fn duration_text(lookup: &dyn SpellLookup, duration_index: i64) -> String {
    if duration_index == 0 {
        return "duration".to_string();
    }
    let base = lookup.duration_base(duration_index).unwrap_or(0);
    if base <= 0 {
        return "duration".to_string();
    }

    let seconds = base.abs() / 1000;
    if seconds < 60 {
        format!("{seconds} sec")
    } else if seconds < 3600 {
        format!("{} min", seconds / 60)
    } else {
        format!("{} hr", seconds / 3600)
    }
}

/// Tooltip prefix for an item spell trigger.
pub fn trigger_prefix(trigger: i64) -> &'static str {
    match trigger {
        0 | 4 | 5 | 6 => "Use:",
        2 => "Chance on hit:",
        _ => "Equip:",
    }
}

/// Total over-time values `$o1..$o3` for a context.
fn overtime_values(lookup: &dyn SpellLookup, ctx: &MacroContext) -> [i64; 3] {
    let duration = if ctx.duration_index > 0 {
        lookup.duration_base(ctx.duration_index).unwrap_or(0).abs()
    } else {
        0
    };

    std::array::from_fn(|i| {
        let base = ctx.base_points[i] + 1;
        let amplitude = ctx.amplitude[i];
        if amplitude > 0 && duration > 0 {
            base * (duration / amplitude)
        } else {
            base
        }
    })
}

fn format_number(value: f64) -> String {
    if value == value.trunc() {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Arithmetic placeholders such as `$/1000;s1` or `$*2;t1`.
fn expand_math(text: &str, ctx: &MacroContext, v: &[i64; 3]) -> String {
    if !MATH_RE.is_match(text) {
        return text.to_string();
    }

    let var = |name: &str| -> Option<f64> {
        match name {
            "s" | "s1" | "m1" => Some(v[0] as f64),
            "s2" | "m2" => Some(v[1] as f64),
            "s3" | "m3" => Some(v[2] as f64),
            "t1" | "t2" | "t3" => {
                let i = usize::from(name.as_bytes()[1] - b'1');
                let amplitude = ctx.amplitude[i];
                (amplitude > 0).then(|| (amplitude / 1000) as f64)
            }
            _ => None,
        }
    };

    MATH_RE
        .replace_all(text, |caps: &Captures| {
            let whole = caps[0].to_string();
            let Ok(operand) = caps[2].parse::<f64>() else {
                return whole;
            };
            let Some(value) = var(&caps[3]) else {
                return whole;
            };
            let result = match &caps[1] {
                "/" if operand != 0.0 => value / operand,
                "/" => 0.0,
                "*" => value * operand,
                "+" => value + operand,
                _ => value - operand,
            };
            format_number(result)
        })
        .into_owned()
}

/// `$<id>d`, `$<id>s<n>` and `$<id>o<n>`: values taken from another spell.
fn expand_cross_references(text: &str, lookup: &dyn SpellLookup) -> String {
    let text = CROSS_DURATION_RE.replace_all(text, |caps: &Captures| {
        let ctx = caps[1].parse().ok().and_then(|id| lookup.macro_context(id));
        match ctx {
            Some(ctx) if ctx.duration_index != 0 => duration_text(lookup, ctx.duration_index),
            _ => caps[0].to_string(),
        }
    });

    let effect = |caps: &Captures| -> Option<(MacroContext, usize)> {
        let n: usize = caps[2].parse().ok()?;
        if !(1..=3).contains(&n) {
            return None;
        }
        let ctx = lookup.macro_context(caps[1].parse().ok()?)?;
        Some((ctx, n - 1))
    };

    let text = CROSS_VALUE_RE.replace_all(&text, |caps: &Captures| match effect(caps) {
        Some((ctx, i)) => ctx.values()[i].to_string(),
        None => caps[0].to_string(),
    });

    CROSS_OVERTIME_RE
        .replace_all(&text, |caps: &Captures| match effect(caps) {
            Some((ctx, i)) => overtime_values(lookup, &ctx)[i].to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Resolve `$l<singular>:<plural>;` using the last integer written before it.
pub fn resolve_plurals(text: &str) -> String {
    if !PLURAL_RE.is_match(text) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLURAL_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);

        let count = NUMBER_RE
            .find_iter(&text[..whole.start()])
            .last()
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0);
        out.push_str(if count == 1 { &caps[1] } else { &caps[2] });
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Expand every placeholder in `template` for the spell described by `ctx`.
///
/// Never fails: placeholders that cannot be resolved stay in the output.
pub fn expand(template: &str, ctx: &MacroContext, lookup: &dyn SpellLookup) -> String {
    if !template.contains('$') {
        return template.to_string();
    }

    let v = ctx.values();
    let duration = duration_text(lookup, ctx.duration_index);

    let mut text = expand_math(template, ctx, &v);

    for (i, value) in v.iter().enumerate() {
        text = text.replace(&format!("$s{}", i + 1), &value.to_string());
    }
    text = text.replace("$s", &v[0].to_string());

    for (i, value) in overtime_values(lookup, ctx).iter().enumerate() {
        text = text.replace(&format!("$o{}", i + 1), &value.to_string());
    }

    text = text.replace("$d", &duration);
    text = text.replace("$h", &ctx.proc_chance.to_string());
    text = text.replace("$n", &ctx.proc_charges.to_string());

    if ctx.max_affected_targets > 0 {
        text = text.replace("$i", &ctx.max_affected_targets.to_string());
    }

    for (i, amplitude) in ctx.amplitude.iter().enumerate() {
        if *amplitude > 0 {
            text = text.replace(&format!("$t{}", i + 1), &(amplitude / 1000).to_string());
        }
    }

    for (i, target) in ctx.chain_target.iter().enumerate() {
        text = text.replace(&format!("$x{}", i + 1), &target.to_string());
    }

    for (i, misc) in ctx.misc_value.iter().enumerate() {
        text = text.replace(&format!("$q{}", i + 1), &misc.to_string());
        text = text.replace(&format!("$u{}", i + 1), &misc.to_string());
    }
    text = text.replace("$q", &ctx.misc_value[0].to_string());
    text = text.replace("$u", &ctx.misc_value[0].to_string());

    for (i, value) in v.iter().enumerate() {
        text = text.replace(&format!("$m{}", i + 1), &value.to_string());
    }

    for (i, index) in ctx.radius_index.iter().enumerate() {
        if *index > 0 {
            let radius = lookup.radius(*index).unwrap_or(0);
            text = text.replace(&format!("$a{}", i + 1), &radius.to_string());
        }
    }

    if ctx.range_id > 0 {
        let range = lookup.range_max(ctx.range_id).unwrap_or(0);
        text = text.replace("$r", &range.to_string());
    }

    if ctx.damage_multiplier > 0.0 {
        text = text.replace("$f1", &format!("{:.1}", ctx.damage_multiplier));
    }

    text = text
        .replace("${s1}", &v[0].to_string())
        .replace("${s2}", &v[1].to_string())
        .replace("${s3}", &v[2].to_string())
        .replace("${d}", &duration)
        .replace("${h}", &ctx.proc_chance.to_string())
        .replace("${n}", &ctx.proc_charges.to_string());

    let text = expand_cross_references(&text, lookup);
    resolve_plurals(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapLookup {
        durations: HashMap<i64, i64>,
        radii: HashMap<i64, i64>,
        ranges: HashMap<i64, i64>,
        spells: HashMap<i64, MacroContext>,
    }

    impl SpellLookup for MapLookup {
        fn duration_base(&self, index: i64) -> Option<i64> {
            self.durations.get(&index).copied()
        }
        fn radius(&self, index: i64) -> Option<i64> {
            self.radii.get(&index).copied()
        }
        fn range_max(&self, id: i64) -> Option<i64> {
            self.ranges.get(&id).copied()
        }
        fn macro_context(&self, spell_id: i64) -> Option<MacroContext> {
            self.spells.get(&spell_id).cloned()
        }
    }

    fn ctx_with_base(bp: [i64; 3]) -> MacroContext {
        MacroContext {
            base_points: bp,
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let text = "Increases your chance to hit by 1%.";
        assert_eq!(expand(text, &MacroContext::default(), &NoLookup), text);
        assert_eq!(expand("", &MacroContext::default(), &NoLookup), "");
    }

    #[test]
    fn test_repeated_value_placeholder() {
        let ctx = ctx_with_base([4, 0, 0]);
        assert_eq!(expand("$s1 $s1", &ctx, &NoLookup), "5 5");
        assert_eq!(expand("$s heals", &ctx, &NoLookup), "5 heals");
    }

    #[test]
    fn test_die_sides_range() {
        let ctx = MacroContext {
            base_points: [9, 19, 0],
            die_sides: [1, 11, 0],
            ..Default::default()
        };
        assert_eq!(expand("$s1 and $s2", &ctx, &NoLookup), "10 and 30");
    }

    #[test]
    fn test_plural_forms() {
        let ctx = MacroContext::default();
        assert_eq!(
            expand("Removes 1 poison $leffect:effects;", &ctx, &NoLookup),
            "Removes 1 poison effect"
        );
        assert_eq!(
            expand("Removes 2 poison $leffect:effects;", &ctx, &NoLookup),
            "Removes 2 poison effects"
        );
    }

    #[test]
    fn test_plural_uses_expanded_value() {
        let ctx = ctx_with_base([0, 0, 0]);
        assert_eq!(
            expand("Gains $s1 $lcharge:charges;.", &ctx, &NoLookup),
            "Gains 1 charge."
        );
        // No number before the placeholder counts as plural
        assert_eq!(resolve_plurals("Some $lcat:cats;"), "Some cats");
    }

    #[test]
    fn test_math_placeholders() {
        let ctx = MacroContext {
            base_points: [4999, 9, 0],
            amplitude: [3000, 0, 0],
            ..Default::default()
        };
        assert_eq!(expand("$/1000;s1 sec", &ctx, &NoLookup), "5 sec");
        assert_eq!(expand("$/4;s2", &ctx, &NoLookup), "2.50");
        assert_eq!(expand("$*2;t1", &ctx, &NoLookup), "6");
        assert_eq!(expand("$/0;s1", &ctx, &NoLookup), "0");
        // Unknown variable stays literal
        assert_eq!(expand("$*2;t2", &ctx, &NoLookup), "$*2;t2");
    }

    #[test]
    fn test_duration_text_ranges() {
        let mut lookup = MapLookup::default();
        lookup.durations.insert(1, 10_000);
        lookup.durations.insert(2, 300_000);
        lookup.durations.insert(3, 7_200_000);
        lookup.durations.insert(4, -1);

        assert_eq!(duration_text(&lookup, 0), "duration");
        assert_eq!(duration_text(&lookup, 1), "10 sec");
        assert_eq!(duration_text(&lookup, 2), "5 min");
        assert_eq!(duration_text(&lookup, 3), "2 hr");
        assert_eq!(duration_text(&lookup, 4), "duration");
        assert_eq!(duration_text(&lookup, 99), "duration");
    }

    #[test]
    fn test_duration_and_overtime() {
        let mut lookup = MapLookup::default();
        lookup.durations.insert(5, 15_000);
        let ctx = MacroContext {
            base_points: [9, 0, 0],
            amplitude: [3000, 0, 0],
            duration_index: 5,
            ..Default::default()
        };
        assert_eq!(
            expand("Heals $o1 over $d, every $t1 sec.", &ctx, &lookup),
            "Heals 50 over 15 sec, every 3 sec."
        );
        assert_eq!(expand("${d}", &ctx, &lookup), "15 sec");
        // No amplitude: the plain value
        assert_eq!(expand("$o2", &ctx, &lookup), "1");
    }

    #[test]
    fn test_scalar_placeholders() {
        let mut lookup = MapLookup::default();
        lookup.radii.insert(8, 10);
        lookup.ranges.insert(4, 30);
        let ctx = MacroContext {
            proc_chance: 15,
            proc_charges: 3,
            chain_target: [4, 0, 0],
            misc_value: [7, 0, 0],
            radius_index: [8, 0, 0],
            range_id: 4,
            damage_multiplier: 0.5,
            max_affected_targets: 5,
            ..Default::default()
        };
        assert_eq!(
            expand("$h% for $n, $x1 targets, $q1/$u, $a1 yd, $r yd, $f1, $i max", &ctx, &lookup),
            "15% for 3, 4 targets, 7/7, 10 yd, 30 yd, 0.5, 5 max"
        );
        assert_eq!(expand("${h} ${n}", &ctx, &lookup), "15 3");
    }

    #[test]
    fn test_guarded_placeholders_stay() {
        let ctx = MacroContext::default();
        assert_eq!(expand("$i $t1 $a1 $r $f1", &ctx, &NoLookup), "$i $t1 $a1 $r $f1");
    }

    #[test]
    fn test_cross_references() {
        let mut lookup = MapLookup::default();
        lookup.durations.insert(3, 60_000);
        lookup.spells.insert(
            12345,
            MacroContext {
                base_points: [19, 4, 0],
                amplitude: [0, 2000, 0],
                duration_index: 3,
                ..Default::default()
            },
        );
        lookup.spells.insert(200, MacroContext::default());

        let ctx = MacroContext::default();
        assert_eq!(expand("$12345s1", &ctx, &lookup), "20");
        assert_eq!(expand("$12345d", &ctx, &lookup), "1 min");
        assert_eq!(expand("$12345o2", &ctx, &lookup), "150");
        // Unknown spell, zero duration index, or bad effect number
        assert_eq!(expand("$999s1", &ctx, &lookup), "$999s1");
        assert_eq!(expand("$200d", &ctx, &lookup), "$200d");
        assert_eq!(expand("$12345s4", &ctx, &lookup), "$12345s4");
    }

    #[test]
    fn test_trigger_prefix() {
        assert_eq!(trigger_prefix(0), "Use:");
        assert_eq!(trigger_prefix(1), "Equip:");
        assert_eq!(trigger_prefix(2), "Chance on hit:");
        assert_eq!(trigger_prefix(6), "Use:");
        assert_eq!(trigger_prefix(42), "Equip:");
    }
}
