// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Generated call expressions: every mix of positional, starred, keyword and double-starred
//! arguments decompiles to its own text on every version.

use proptest::prelude::*;
use unpyc_decompiler::{DecompileOptions, Version, verify_round_trip};
use unpyc_pycompile::{Mode, compile};

#[derive(Debug, Clone)]
struct CallShape {
    positional: usize,
    star: bool,
    keywords: usize,
    double_star: bool,
}

impl CallShape {
    fn source(&self) -> String {
        let mut args: Vec<String> = (0..self.positional).map(|i| format!("arg{i}")).collect();
        if self.star {
            args.push("*args".to_string());
        }
        args.extend((0..self.keywords).map(|i| format!("name{i}=value{i}")));
        if self.double_star {
            args.push("**kwargs".to_string());
        }
        format!("func({})", args.join(", "))
    }
}

fn arb_call() -> impl Strategy<Value = CallShape> {
    (0usize..6, any::<bool>(), 0usize..6, any::<bool>()).prop_map(
        |(positional, star, keywords, double_star)| CallShape {
            positional,
            star,
            keywords,
            double_star,
        },
    )
}

fn arb_version() -> impl Strategy<Value = Version> {
    prop::sample::select(Version::SUPPORTED.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn call_round_trips(shape in arb_call(), version in arb_version()) {
        let source = shape.source();
        let code = compile(&source, version, Mode::Exec)
            .map_err(|e| TestCaseError::fail(format!("{version}: {e}")))?;
        let text = verify_round_trip(&code, version, &DecompileOptions::default(), |text| {
            compile(text, version, Mode::Exec)
        })
        .map_err(|e| TestCaseError::fail(format!("{version}: {source}: {e}")))?;
        prop_assert_eq!(text, format!("{}\n", source));
    }

    #[test]
    fn call_statement_in_function_round_trips(shape in arb_call(), version in arb_version()) {
        let source = format!("def f():\n    return {}\n", shape.source());
        let code = compile(&source, version, Mode::Exec)
            .map_err(|e| TestCaseError::fail(format!("{version}: {e}")))?;
        let text = verify_round_trip(&code, version, &DecompileOptions::default(), |text| {
            compile(text, version, Mode::Exec)
        })
        .map_err(|e| TestCaseError::fail(format!("{version}: {source}: {e}")))?;
        prop_assert_eq!(text, source);
    }
}
