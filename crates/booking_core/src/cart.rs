use serde::Serialize;
use shared::{
    domain::{Lesson, LessonId},
    protocol::OrderLine,
};
use tracing::debug;

/// A booked lesson. Subject, location and price are captured when the line is
/// first created and are not refreshed from the catalog afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub lesson_id: LessonId,
    pub subject: String,
    pub location: String,
    pub price: f64,
    pub quantity: u32,
    /// Spaces this line currently holds back from the local catalog. Lower
    /// than `quantity` when a refresh reported fewer spaces than reserved.
    #[serde(skip)]
    held: u32,
}

impl CartLine {
    fn from_lesson(lesson: &Lesson) -> Self {
        Self {
            lesson_id: lesson.id.clone(),
            subject: lesson.subject.clone(),
            location: lesson.location.clone(),
            price: lesson.price,
            quantity: 1,
            held: 1,
        }
    }

    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CartTotals {
    pub items: u32,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { quantity: u32 },
    SoldOut,
    UnknownLesson,
    /// An order is in flight; the cart cannot change until it settles.
    CheckoutPending,
}

impl AddOutcome {
    pub fn is_added(self) -> bool {
        matches!(self, Self::Added { .. })
    }
}

/// Cart lines in insertion order, at most one per lesson.
#[derive(Debug, Clone, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, lesson_id: &LessonId) -> Option<&CartLine> {
        self.lines.iter().find(|line| &line.lesson_id == lesson_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn reserved(&self, lesson_id: &LessonId) -> u32 {
        self.line(lesson_id).map_or(0, |line| line.quantity)
    }

    /// Reserves one space of `lesson_id`, taking it from the local catalog.
    pub fn add(&mut self, lessons: &mut [Lesson], lesson_id: &LessonId) -> AddOutcome {
        let Some(lesson) = lessons.iter_mut().find(|lesson| &lesson.id == lesson_id) else {
            debug!(lesson_id = %lesson_id, "cart: add ignored, lesson not in catalog");
            return AddOutcome::UnknownLesson;
        };
        if lesson.is_sold_out() {
            debug!(lesson_id = %lesson_id, "cart: add ignored, lesson sold out");
            return AddOutcome::SoldOut;
        }

        lesson.spaces -= 1;
        let quantity = match self.lines.iter_mut().find(|line| &line.lesson_id == lesson_id) {
            Some(line) => {
                line.quantity += 1;
                line.held += 1;
                line.quantity
            }
            None => {
                self.lines.push(CartLine::from_lesson(lesson));
                1
            }
        };
        AddOutcome::Added { quantity }
    }

    /// Drops the whole line and hands the spaces it held back to the lesson,
    /// if the lesson is still in the local catalog.
    pub fn remove(&mut self, lessons: &mut [Lesson], lesson_id: &LessonId) -> Option<CartLine> {
        let index = self
            .lines
            .iter()
            .position(|line| &line.lesson_id == lesson_id)?;
        let line = self.lines.remove(index);
        if let Some(lesson) = lessons.iter_mut().find(|lesson| &lesson.id == lesson_id) {
            lesson.spaces = lesson.spaces.saturating_add(line.held);
        }
        Some(line)
    }

    /// Takes the units of a placed order out of the cart. Lines reserved after
    /// the order was built survive.
    pub fn settle(&mut self, ordered: &[OrderLine]) {
        for placed in ordered {
            if let Some(line) = self
                .lines
                .iter_mut()
                .find(|line| line.lesson_id == placed.lesson_id)
            {
                line.quantity = line.quantity.saturating_sub(placed.qty);
                line.held = line.held.saturating_sub(placed.qty).min(line.quantity);
            }
        }
        self.lines.retain(|line| line.quantity > 0);
    }

    pub fn totals(&self) -> CartTotals {
        self.lines.iter().fold(CartTotals::default(), |acc, line| CartTotals {
            items: acc.items + line.quantity,
            price: acc.price + line.line_total(),
        })
    }

    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.lines
            .iter()
            .map(|line| OrderLine {
                lesson_id: line.lesson_id.clone(),
                qty: line.quantity,
            })
            .collect()
    }

    /// Overlays current reservations on a freshly fetched catalog whose space
    /// counts do not yet include them. A line can only hold back what the
    /// refreshed count still offers.
    pub fn reapply_reservations(&mut self, lessons: &mut [Lesson]) {
        for line in &mut self.lines {
            let Some(lesson) = lessons.iter_mut().find(|lesson| lesson.id == line.lesson_id)
            else {
                line.held = 0;
                continue;
            };
            if lesson.spaces < line.quantity {
                debug!(
                    lesson_id = %line.lesson_id,
                    reserved = line.quantity,
                    available = lesson.spaces,
                    "cart: reservation exceeds refreshed space count"
                );
            }
            line.held = line.quantity.min(lesson.spaces);
            lesson.spaces -= line.held;
        }
    }
}
