use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "planner-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "PLANNER_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "PLANNER_TIME_CONFIG";
const DEFAULT_REFERENCE_TIMEZONE: &str =
  "America/Lima";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// The single zone every day boundary
/// is computed in, regardless of where
/// the viewer is.
pub fn reference_timezone() -> &'static Tz
{
  static REFERENCE_TZ: OnceLock<Tz> =
    OnceLock::new();
  REFERENCE_TZ.get_or_init(
    resolve_reference_timezone
  )
}

/// "Now" expressed in the reference
/// zone.
#[must_use]
pub fn current_reference_instant()
-> DateTime<Tz> {
  Utc::now()
    .with_timezone(reference_timezone())
}

#[must_use]
pub fn canonical_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(reference_timezone())
    .date_naive()
}

#[must_use]
pub fn day_key(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-DD` of `input` in the
/// reference zone, or an empty string
/// when the input cannot be parsed.
#[must_use]
pub fn to_canonical_day(
  input: &str
) -> String {
  parse_timestamp(input)
    .map(|dt| day_key(canonical_date(dt)))
    .unwrap_or_default()
}

/// Unknown inputs never compare equal.
#[must_use]
pub fn same_day(
  a: &str,
  b: &str
) -> bool {
  let left = to_canonical_day(a);
  !left.is_empty()
    && left == to_canonical_day(b)
}

/// Lenient parse of stored or wire
/// timestamps. Offset-less values are
/// read as reference-zone local time.
pub fn parse_timestamp(
  raw: &str
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_reference_local(
        ndt, fmt
      )
      .ok();
    }
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
  .and_then(|date| {
    date.and_hms_opt(0, 0, 0)
  })
  .and_then(|midnight| {
    to_utc_from_reference_local(
      midnight, "date"
    )
    .ok()
  })
}

#[must_use]
pub fn week_start(
  date: NaiveDate
) -> NaiveDate {
  let offset = date
    .weekday()
    .num_days_from_monday();
  date
    .checked_sub_signed(Duration::days(
      i64::from(offset)
    ))
    .unwrap_or(date)
}

/// Monday-first days of the week that
/// contains `now` in the reference zone.
#[must_use]
pub fn week_days(
  now: DateTime<Utc>
) -> [NaiveDate; 7] {
  let monday =
    week_start(canonical_date(now));
  let mut days = [monday; 7];
  for (idx, day) in
    days.iter_mut().enumerate()
  {
    *day = monday
      .checked_add_signed(
        Duration::days(idx as i64)
      )
      .unwrap_or(monday);
  }
  days
}

fn resolve_reference_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_REFERENCE_TIMEZONE,
    "DEFAULT_REFERENCE_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured reference timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_reference_local(
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match reference_timezone()
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in reference \
         timezone: {context}"
      ))
    }
  }
}

/// Calendar date typed by a user:
/// `today`, `tomorrow`, `yesterday`,
/// weekday names, `+Nd`/`-Nd` or
/// `YYYY-MM-DD`.
#[tracing::instrument(skip(now))]
pub fn parse_date_input(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = canonical_date(now);

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return shift_days(today, 1);
    }
    | "yesterday" => {
      return shift_days(today, -1);
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today,
      target_weekday
    ));
  }

  if let Some((sign, num, unit)) =
    parse_relative(token)?
    && unit == "d"
  {
    return shift_days(today, sign * num);
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .map_err(|_| {
    anyhow!(
      "unrecognized date: {input}"
    )
  })
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, weekday \
     names (e.g. monday), +Nd/-Nd, \
     YYYY-MM-DD"
  })
}

/// Timestamp typed by a user. Dates
/// resolve to midnight in the
/// reference zone.
#[tracing::instrument(skip(now))]
pub fn parse_timestamp_input(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();

  if token.eq_ignore_ascii_case("now") {
    return Ok(now);
  }

  if let Some((sign, num, unit)) =
    parse_relative(token)?
  {
    let duration = match unit {
      | "d" => Duration::try_days(num),
      | "h" => Duration::try_hours(num),
      | "m" => {
        Duration::try_minutes(num)
      }
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };
    let shifted =
      duration.and_then(|duration| {
        if sign < 0 {
          now.checked_sub_signed(duration)
        } else {
          now.checked_add_signed(duration)
        }
      });
    return shifted.ok_or_else(|| {
      anyhow!(
        "date out of range: {token}"
      )
    });
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let local_now = now.with_timezone(
      reference_timezone()
    );
    let mut day = local_now.date_naive();
    let candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if candidate
      <= local_now.naive_local()
    {
      day = shift_days(day, 1)?;
    }
    let next = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      })?;
    return to_utc_from_reference_local(
      next,
      "clock-time"
    );
  }

  if let Some(parsed) =
    parse_timestamp(token)
  {
    return Ok(parsed);
  }

  let date =
    parse_date_input(token, now)
      .with_context(|| {
        format!(
          "unrecognized timestamp: \
           {input}"
        )
      })?;
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for date"
      )
    })?;
  to_utc_from_reference_local(
    midnight, "date"
  )
}

fn parse_relative(
  token: &str
) -> anyhow::Result<
  Option<(i64, i64, &'static str)>
> {
  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  let Some(caps) = rel_re.captures(token)
  else {
    return Ok(None);
  };

  let sign = match caps
    .name("sign")
    .map(|m| m.as_str())
  {
    | Some("-") => -1,
    | _ => 1
  };
  let num: i64 = caps
    .name("num")
    .map(|m| m.as_str())
    .ok_or_else(|| {
      anyhow!("missing relative amount")
    })?
    .parse()
    .context("invalid relative number")?;
  let unit = match caps
    .name("unit")
    .map(|m| m.as_str())
  {
    | Some("d") => "d",
    | Some("h") => "h",
    | Some("m") => "m",
    | other => {
      return Err(anyhow!(
        "unknown relative unit: \
         {other:?}"
      ));
    }
  };

  Ok(Some((sign, num, unit)))
}

fn shift_days(
  date: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  Duration::try_days(days)
    .and_then(|delta| {
      date.checked_add_signed(delta)
    })
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {date} \
         {days:+}d"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

/// Serde adapter for optional wire
/// timestamps: unparsable values
/// deserialize to `None` instead of
/// failing the whole row.
pub mod lenient_timestamp {
  use chrono::{
    DateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match dt {
      | Some(value) => {
        serializer.serialize_str(
          &value.to_rfc3339_opts(
            SecondsFormat::AutoSi,
            true
          )
        )
      }
      | None => {
        serializer.serialize_none()
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<
    Option<DateTime<Utc>>,
    D::Error
  >
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    Ok(opt.and_then(|raw| {
      let parsed =
        super::parse_timestamp(&raw);
      if parsed.is_none() {
        tracing::warn!(
          raw = %raw,
          "unparsable timestamp; treating as absent"
        );
      }
      parsed
    }))
  }
}
