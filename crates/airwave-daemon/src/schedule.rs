//! Static weekly program guide, used as the fallback `program` text when a
//! station has no live source for it.
//!
//! Resolution is a pure function of (station key, instant): no network, no
//! interior mutability.  A slot whose start is after its end wraps past
//! midnight; the part after midnight belongs to the following weekday.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub program: String,
}

impl Slot {
    fn covers(&self, day: Weekday, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.day == day && time >= self.start && time < self.end
        } else {
            (self.day == day && time >= self.start) || (self.day.succ() == day && time < self.end)
        }
    }
}

pub struct ScheduleResolver {
    tz: Tz,
    slots: HashMap<String, Vec<Slot>>,
}

const MON: u8 = 1 << 0;
const TUE: u8 = 1 << 1;
const WED: u8 = 1 << 2;
const THU: u8 = 1 << 3;
const FRI: u8 = 1 << 4;
const SAT: u8 = 1 << 5;
const SUN: u8 = 1 << 6;
const SUN_THU: u8 = SUN | MON | TUE | WED | THU;
const EVERY_DAY: u8 = SUN_THU | FRI | SAT;

/// (station key, day mask, start, end, program)
const BUILTIN_SCHEDULE: &[(&str, u8, &str, &str, &str)] = &[
    ("kan-bet", SUN_THU, "06:00", "09:00", "חדשות הבוקר"),
    ("kan-bet", SUN_THU, "09:00", "12:00", "סדר יום"),
    ("kan-bet", SUN_THU, "12:00", "14:00", "הכל כלול"),
    ("kan-bet", SUN_THU, "17:00", "19:00", "חדשות הערב"),
    ("kan-bet", SUN_THU, "22:00", "02:00", "הלילה הזה"),
    ("kan-bet", FRI, "07:00", "10:00", "שישי בבוקר"),
    ("kan-bet", SAT, "09:00", "12:00", "שבת של תרבות"),
    ("galei-tzahal", SUN_THU, "06:00", "09:00", "בוקר גלצ"),
    ("galei-tzahal", SUN_THU, "09:00", "12:00", "מהדורת הצהריים"),
    ("galei-tzahal", SUN_THU, "19:00", "22:00", "שידור ערב"),
    ("galei-tzahal", EVERY_DAY, "00:00", "06:00", "לילה בגלי צה\"ל"),
    ("kan-88", EVERY_DAY, "00:00", "06:00", "פלייליסט לילה"),
    ("kan-88", SUN_THU, "07:00", "10:00", "88 בבוקר"),
    ("kan-88", FRI, "12:00", "15:00", "שישי ב-88"),
    ("kan-gimel", SUN_THU, "06:00", "09:00", "בוקר גימל"),
    ("kan-gimel", EVERY_DAY, "21:00", "00:00", "מוזיקה ישראלית בערב"),
    ("radio-103", SUN_THU, "06:00", "09:00", "הבוקר של 103"),
    ("radio-103", SUN_THU, "16:00", "19:00", "אחר הצהריים"),
    ("radio-103", SUN_THU, "23:00", "01:00", "ערב ב-103"),
    ("eco-99", SUN_THU, "06:00", "10:00", "אקו בבוקר"),
    ("eco-99", SAT, "10:00", "14:00", "שבת של אקו"),
    ("radio-tel-aviv", SUN_THU, "07:00", "10:00", "בוקר תל אביב"),
    ("radio-tel-aviv", FRI, "14:00", "17:00", "שישי בעיר"),
];

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl ScheduleResolver {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            slots: HashMap::new(),
        }
    }

    /// Resolver for the named zone; unknown names fall back to Jerusalem.
    pub fn from_zone_name(name: &str) -> Self {
        let tz = name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("schedule: unknown timezone '{}', using Asia/Jerusalem", name);
            chrono_tz::Asia::Jerusalem
        });
        Self::builtin(tz)
    }

    pub fn builtin(tz: Tz) -> Self {
        let mut resolver = Self::new(tz);
        for (key, mask, start, end, program) in BUILTIN_SCHEDULE {
            let (Ok(start), Ok(end)) = (
                NaiveTime::parse_from_str(start, "%H:%M"),
                NaiveTime::parse_from_str(end, "%H:%M"),
            ) else {
                continue;
            };
            for day in ALL_DAYS {
                if mask & (1 << day.num_days_from_monday()) != 0 {
                    resolver.insert(key, day, start, end, program);
                }
            }
        }
        resolver
    }

    pub fn insert(
        &mut self,
        station_key: &str,
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
        program: &str,
    ) {
        self.slots
            .entry(station_key.to_string())
            .or_default()
            .push(Slot {
                day,
                start,
                end,
                program: program.to_string(),
            });
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Program on air for `station_key` at `now`, if the guide knows one.
    pub fn resolve(&self, station_key: &str, now: DateTime<Utc>) -> Option<&str> {
        let local = self.tz.from_utc_datetime(&now.naive_utc());
        let (day, time) = (local.weekday(), local.time());
        self.slots
            .get(station_key)?
            .iter()
            .find(|slot| slot.covers(day, time))
            .map(|slot| slot.program.as_str())
    }
}
