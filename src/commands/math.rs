// src/commands/math.rs
//
// Arithmetic over Int/Float arguments. Results land in the formal
// result; integer operands stay integers unless a float is involved.

use crate::commands::types::{Command, CommandContext};
use crate::interpreter::errors::{EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::value::{Number, Value};

fn numeric_args(ctx: &CommandContext, name: &str) -> Option<Vec<Number>> {
    let mut numbers = Vec::with_capacity(ctx.args.len());
    for arg in &ctx.args {
        match arg.as_number() {
            Some(n) => numbers.push(n),
            None => {
                logging::emit(
                    LogLevel::Error,
                    LogCategory::Type,
                    Some(&ctx.position),
                    &format!("{}: expected a number, got {}", name, arg.type_name()),
                );
                return None;
            }
        }
    }
    if numbers.is_empty() {
        logging::emit(
            LogLevel::Error,
            LogCategory::Argument,
            Some(&ctx.position),
            &format!("{}: expected at least one number", name),
        );
        return None;
    }
    Some(numbers)
}

fn fold_ints(numbers: &[Number]) -> Option<Vec<i64>> {
    numbers
        .iter()
        .map(|n| match n {
            Number::Int(v) => Some(*v),
            Number::Float(_) => None,
        })
        .collect()
}

pub struct AddCommand;

impl Command for AddCommand {
    fn name(&self) -> &str {
        "add"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(numbers) = numeric_args(ctx, "add") else {
            return Ok(Flow::Status(false));
        };
        let result = match fold_ints(&numbers) {
            Some(ints) => Value::Int(ints.iter().sum()),
            None => Value::Float(numbers.iter().map(Number::as_f64).sum()),
        };
        ctx.set_result(result);
        Ok(Flow::Status(true))
    }
}

pub struct SubCommand;

impl Command for SubCommand {
    fn name(&self) -> &str {
        "sub"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(numbers) = numeric_args(ctx, "sub") else {
            return Ok(Flow::Status(false));
        };
        let result = match fold_ints(&numbers) {
            Some(ints) => {
                let mut it = ints.into_iter();
                let first = it.next().unwrap_or(0);
                Value::Int(it.fold(first, |acc, n| acc - n))
            }
            None => {
                let mut it = numbers.iter().map(Number::as_f64);
                let first = it.next().unwrap_or(0.0);
                Value::Float(it.fold(first, |acc, n| acc - n))
            }
        };
        ctx.set_result(result);
        Ok(Flow::Status(true))
    }
}

pub struct MulCommand;

impl Command for MulCommand {
    fn name(&self) -> &str {
        "mul"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(numbers) = numeric_args(ctx, "mul") else {
            return Ok(Flow::Status(false));
        };
        let result = match fold_ints(&numbers) {
            Some(ints) => Value::Int(ints.iter().product()),
            None => Value::Float(numbers.iter().map(Number::as_f64).product()),
        };
        ctx.set_result(result);
        Ok(Flow::Status(true))
    }
}

pub struct DivCommand;

impl Command for DivCommand {
    fn name(&self) -> &str {
        "div"
    }

    fn execute(&self, ctx: &mut CommandContext) -> EngineResult<Flow> {
        let Some(numbers) = numeric_args(ctx, "div") else {
            return Ok(Flow::Status(false));
        };
        if numbers[1..].iter().any(|n| n.as_f64() == 0.0) {
            logging::emit(
                LogLevel::Error,
                LogCategory::Math,
                Some(&ctx.position),
                "div: division by zero",
            );
            return Ok(Flow::Status(false));
        }
        let float_div = || {
            let mut it = numbers.iter().map(Number::as_f64);
            let first = it.next().unwrap_or(0.0);
            Value::Float(it.fold(first, |acc, n| acc / n))
        };
        // Integer division only when it stays exact
        let result = match fold_ints(&numbers) {
            Some(ints) => {
                let exact = ints[1..]
                    .iter()
                    .try_fold(ints[0], |acc, &n| (acc % n == 0).then(|| acc / n));
                match exact {
                    Some(v) => Value::Int(v),
                    None => float_div(),
                }
            }
            None => float_div(),
        };
        ctx.set_result(result);
        Ok(Flow::Status(true))
    }
}
