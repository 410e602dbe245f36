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

//! Decompilation throughput per version, from scanning through unparsing.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use unpyc_decompiler::{DecompileOptions, Decompiler, Version, dialect_for};
use unpyc_pycompile::{Mode, compile};

const PROGRAMS: &[(&str, &str)] = &[
    ("Simple", "x = 1\n"),
    ("Calls", "func(arg0, *args, name0=value0, **kwargs)\nobj.method(a, b, key=c)\n"),
    (
        "Function",
        "def f(a, b=1, *rest, c, **kw):\n    if a:\n        return g(a, *rest, c=c)\n    return [x * b for x in rest]\n",
    ),
    (
        "Class",
        "class A(B):\n    x = 1\n    def m(self, y):\n        self.x += y\n        return self.x\n",
    ),
    (
        "Loops",
        "total = 0\nfor i in items:\n    total += i\nwhile total:\n    total -= 1\nelse:\n    done = True\n",
    ),
];

fn bench_decompile(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompile");
    for version in Version::SUPPORTED {
        let decompiler = Decompiler::new(version, DecompileOptions::default()).unwrap();
        for (name, source) in PROGRAMS {
            let code = compile(source, version, Mode::Exec).unwrap();
            group.bench_with_input(
                BenchmarkId::new(*name, version.to_string()),
                &code,
                |b, code| b.iter(|| black_box(decompiler.decompile(black_box(code)).unwrap())),
            );
        }
    }
    group.finish();
}

fn bench_session_grammar(c: &mut Criterion) {
    let version = Version::V3_6;
    let decompiler = Decompiler::new(version, DecompileOptions::default()).unwrap();
    let code = compile(PROGRAMS[1].1, version, Mode::Exec).unwrap();
    let scanned = decompiler.scan(&code).unwrap();
    c.bench_function("session_grammar", |b| {
        b.iter(|| black_box(decompiler.session_grammar(black_box(&scanned))))
    });
    c.bench_function("dialect_lookup", |b| {
        b.iter(|| black_box(dialect_for(black_box(version)).unwrap()))
    });
}

criterion_group!(benches, bench_decompile, bench_session_grammar);
criterion_main!(benches);
